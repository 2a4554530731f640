//! Nidra daemon entry point.
//!
//! Runs the memory consolidation and report synthesis background jobs
//! against the configured relational store. The task scheduler (§4.1) is a
//! library component instantiated by an embedding application once it
//! supplies an `LlmProvider` and `TaskExecutor` (§6.1) — those are external
//! collaborators this binary does not provide, so it is not wired here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Datelike;
use nidra::adapters::sqlite::SqliteConsolidationStore;
use nidra::infrastructure::config::ConfigLoader;
use nidra::infrastructure::database::DatabaseConnection;
use nidra::infrastructure::logging::{LogConfig, LoggerImpl};
use nidra::{ConsolidationPipeline, ReportSynthesizer};

const SVAPNA_INTERVAL: Duration = Duration::from_secs(6 * 3600);

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;

    let log_config = LogConfig::from_domain(&config.logging, Some(PathBuf::from(".nidra/logs")));
    let _logger = LoggerImpl::init(&log_config).context("failed to initialize logging")?;

    let database_url = format!("sqlite:{}", config.database.path);
    let connection = DatabaseConnection::with_max_connections(&database_url, config.database.max_connections)
        .await
        .context("failed to open database connection")?;

    let store = Arc::new(SqliteConsolidationStore::new(connection.pool().clone()));
    store.ensure_schema().await.context("failed to create schema")?;

    let pipeline = ConsolidationPipeline::new(store.clone(), config.svapna.clone());
    let reports_home = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let reports = ReportSynthesizer::new(store, reports_home);

    tracing::info!("nidra daemon started, svapna cycles every {:?}", SVAPNA_INTERVAL);

    let mut ticker = tokio::time::interval(SVAPNA_INTERVAL);
    loop {
        ticker.tick().await;
        match pipeline.run(None).await {
            Ok(result) => tracing::info!(cycle_id = %result.cycle_id, sessions = result.sessions_processed, "svapna cycle complete"),
            Err(err) => tracing::error!(error = %err, "svapna cycle failed"),
        }

        let now = chrono::Utc::now();
        if now.day() == 1 {
            let (prev_year, prev_month) = if now.month() == 1 { (now.year() - 1, 12) } else { (now.year(), now.month() - 1) };
            if let Err(err) = reports.monthly(prev_year, prev_month, config.svapna.project.as_deref()).await {
                tracing::error!(error = %err, "monthly report generation failed");
            }
            if prev_month == 12 {
                if let Err(err) = reports.yearly(prev_year, config.svapna.project.as_deref()).await {
                    tracing::error!(error = %err, "yearly report generation failed");
                }
            }
        }
    }
}
