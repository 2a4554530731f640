//! End-to-end exercise of the memory consolidation pipeline and report
//! synthesizer against a real SQLite-backed store, the way the daemon
//! entry point drives them in production.

use std::sync::Arc;

use chrono::{Datelike, Duration, Utc};
use nidra::adapters::sqlite::SqliteConsolidationStore;
use nidra::domain::models::{Samskara, SvapnaConfig};
use nidra::domain::ports::ConsolidationStore;
use nidra::services::report_synthesizer::ReportKind;
use nidra::{ConsolidationPipeline, ReportSynthesizer};
use sqlx::SqlitePool;
use uuid::Uuid;

#[tokio::test]
async fn full_cycle_then_monthly_report_reflects_seeded_sessions() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = Arc::new(SqliteConsolidationStore::new(pool.clone()));
    store.ensure_schema().await.unwrap();

    let project = "demo";
    let now = Utc::now();
    for i in 0..3 {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO sessions (id, project, cost, total_tokens, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        )
        .bind(id.to_string())
        .bind(project)
        .bind(2.0_f64)
        .bind(500_i64)
        .bind((now - Duration::days(i)).to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();
    }

    let samskara = Samskara {
        id: Uuid::new_v4(),
        pattern_type: "preference".into(),
        pattern_content: "uses 4-space indent".into(),
        observation_count: 5,
        confidence: 0.9,
        originating_session: Uuid::new_v4(),
        project: Some(project.into()),
        created_at: now,
    };
    store.upsert_samskara(&samskara).await.unwrap();

    let config = SvapnaConfig { project: Some(project.into()), ..SvapnaConfig::default() };
    let pipeline = ConsolidationPipeline::new(store.clone(), config);

    let result = pipeline.run(None).await.expect("svapna cycle should succeed");
    assert_eq!(result.sessions_processed, 3);

    let state = store.load_nidra_state().await.unwrap();
    assert_eq!(state.consolidation_progress, 1.0);

    let reports_home = tempfile::tempdir().unwrap();
    let synthesizer = ReportSynthesizer::new(store.clone(), reports_home.path().to_path_buf());

    let (year, month) = (now.year(), now.month());
    let path = synthesizer.monthly(year, month, Some(project)).await.expect("monthly report should succeed");
    assert!(path.exists());

    let body = std::fs::read_to_string(&path).unwrap();
    assert!(body.contains('3'), "report should mention the 3 seeded sessions:\n{body}");

    let expected_path = synthesizer.get_report_path(&ReportKind::Monthly { year, month }, Some(project));
    assert_eq!(path, expected_path);
}

#[tokio::test]
async fn monthly_report_with_no_sessions_still_produces_a_zeroed_artifact() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = Arc::new(SqliteConsolidationStore::new(pool));
    store.ensure_schema().await.unwrap();

    let reports_home = tempfile::tempdir().unwrap();
    let synthesizer = ReportSynthesizer::new(store, reports_home.path().to_path_buf());

    let now = Utc::now();
    let path = synthesizer.monthly(now.year(), now.month(), None).await.expect("empty-window report should still succeed");
    assert!(path.exists());
}
