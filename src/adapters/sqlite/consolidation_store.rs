//! SQLite implementation of `ConsolidationStore` (§6.1, §10.5).
//!
//! Schema is created in code via `ensure_schema` rather than shipped as a
//! `migrations/` directory — the SQLite schema as a filesystem artifact is
//! out of scope; only the relational shape below is normative. Table and
//! column choices mirror the teacher's `SessionRepositoryImpl` style:
//! `SqlitePool` held by value, `sqlx::query`/`query_as` with runtime SQL
//! (no compile-time `query!` macros, since there is no live database at
//! build time), and `parse_datetime` for the RFC3339/SQLite-format split.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    ConsolidationLogRow, CycleStatus, CycleType, GraphEdge, GraphNode, NidraState, Samskara, Session,
    ToolCall, Turn, Valence, Vasana, Vidhi,
};
use crate::domain::ports::ConsolidationStore;
use crate::infrastructure::database::utils::parse_datetime;

pub struct SqliteConsolidationStore {
    pool: SqlitePool,
}

impl SqliteConsolidationStore {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create all tables this store needs, idempotently.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                project TEXT,
                cost REAL NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS turns (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_calls TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS samskaras (
                id TEXT PRIMARY KEY,
                pattern_type TEXT NOT NULL,
                pattern_content TEXT NOT NULL,
                observation_count INTEGER NOT NULL DEFAULT 1,
                confidence REAL NOT NULL DEFAULT 0,
                originating_session TEXT NOT NULL,
                project TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vasanas (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                valence TEXT NOT NULL,
                strength REAL NOT NULL,
                stability REAL NOT NULL,
                source_samskara_ids TEXT NOT NULL DEFAULT '[]',
                activation_count INTEGER NOT NULL DEFAULT 0,
                last_activated_at TEXT NOT NULL,
                project TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vidhis (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                steps TEXT NOT NULL DEFAULT '[]',
                parameter_schema TEXT NOT NULL DEFAULT '[]',
                trigger_phrases TEXT NOT NULL DEFAULT '[]',
                success_rate REAL NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                source_session_ids TEXT NOT NULL DEFAULT '[]',
                confidence REAL NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS consolidation_log (
                id TEXT PRIMARY KEY,
                project TEXT,
                cycle_type TEXT NOT NULL,
                cycle_id TEXT NOT NULL,
                phase TEXT,
                phase_duration_ms INTEGER,
                vasanas_created INTEGER NOT NULL DEFAULT 0,
                vidhis_created INTEGER NOT NULL DEFAULT 0,
                samskaras_processed INTEGER NOT NULL DEFAULT 0,
                sessions_processed INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nidra_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                consolidation_phase TEXT,
                consolidation_progress REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_nodes (
                id TEXT PRIMARY KEY,
                project TEXT,
                label TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_edges (
                id TEXT PRIMARY KEY,
                project TEXT,
                from_node TEXT NOT NULL,
                to_node TEXT NOT NULL,
                relation TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn valence_str(v: Valence) -> &'static str {
    match v {
        Valence::Positive => "positive",
        Valence::Negative => "negative",
        Valence::Neutral => "neutral",
    }
}

fn valence_from_str(s: &str) -> Valence {
    match s {
        "positive" => Valence::Positive,
        "negative" => Valence::Negative,
        _ => Valence::Neutral,
    }
}

fn cycle_type_from_str(s: &str) -> CycleType {
    match s {
        "monthly" => CycleType::Monthly,
        "yearly" => CycleType::Yearly,
        _ => CycleType::Svapna,
    }
}

fn cycle_status_from_str(s: &str) -> CycleStatus {
    match s {
        "success" => CycleStatus::Success,
        "failed" => CycleStatus::Failed,
        _ => CycleStatus::Running,
    }
}

fn json_or_default<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

#[async_trait]
impl ConsolidationStore for SqliteConsolidationStore {
    async fn recent_sessions(&self, project: Option<&str>, limit: u32) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, project, cost, total_tokens, created_at, updated_at FROM sessions
             WHERE (?1 IS NULL AND project IS NULL) OR project = ?1
             ORDER BY updated_at DESC LIMIT ?2",
        )
        .bind(project)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    async fn sessions_in_range(
        &self,
        project: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, project, cost, total_tokens, created_at, updated_at FROM sessions
             WHERE ((?1 IS NULL AND project IS NULL) OR project = ?1)
               AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at ASC",
        )
        .bind(project)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    async fn turns_for_session(&self, session_id: Uuid) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, content, tool_calls, created_at FROM turns
             WHERE session_id = ?1 ORDER BY created_at ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let tool_calls_raw: String = row.try_get("tool_calls")?;
                Ok(Turn {
                    id: parse_uuid(row.try_get("id")?)?,
                    session_id: parse_uuid(row.try_get("session_id")?)?,
                    content: row.try_get("content")?,
                    tool_calls: json_or_default::<Vec<ToolCall>>(&tool_calls_raw),
                    created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn samskaras(&self, project: Option<&str>, min_observation_count: u32) -> Result<Vec<Samskara>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, pattern_type, pattern_content, observation_count, confidence,
                    originating_session, project, created_at
             FROM samskaras
             WHERE ((?1 IS NULL AND project IS NULL) OR project = ?1)
               AND observation_count >= ?2",
        )
        .bind(project)
        .bind(i64::from(min_observation_count))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Samskara {
                    id: parse_uuid(row.try_get("id")?)?,
                    pattern_type: row.try_get("pattern_type")?,
                    pattern_content: row.try_get("pattern_content")?,
                    observation_count: row.try_get::<i64, _>("observation_count")? as u32,
                    confidence: row.try_get("confidence")?,
                    originating_session: parse_uuid(row.try_get("originating_session")?)?,
                    project: row.try_get("project")?,
                    created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn upsert_samskara(&self, samskara: &Samskara) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO samskaras
                (id, pattern_type, pattern_content, observation_count, confidence, originating_session, project, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                observation_count = excluded.observation_count,
                confidence = excluded.confidence",
        )
        .bind(samskara.id.to_string())
        .bind(&samskara.pattern_type)
        .bind(&samskara.pattern_content)
        .bind(i64::from(samskara.observation_count))
        .bind(samskara.confidence)
        .bind(samskara.originating_session.to_string())
        .bind(&samskara.project)
        .bind(samskara.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn vasanas(&self, project: Option<&str>) -> Result<Vec<Vasana>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, description, valence, strength, stability, source_samskara_ids,
                    activation_count, last_activated_at, project
             FROM vasanas WHERE (?1 IS NULL AND project IS NULL) OR project = ?1",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let source_ids_raw: String = row.try_get("source_samskara_ids")?;
                Ok(Vasana {
                    id: parse_uuid(row.try_get("id")?)?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    valence: valence_from_str(&row.try_get::<String, _>("valence")?),
                    strength: row.try_get("strength")?,
                    stability: row.try_get("stability")?,
                    source_samskara_ids: json_or_default::<Vec<Uuid>>(&source_ids_raw),
                    activation_count: row.try_get::<i64, _>("activation_count")? as u32,
                    last_activated_at: parse_datetime(&row.try_get::<String, _>("last_activated_at")?)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                    project: row.try_get("project")?,
                })
            })
            .collect()
    }

    async fn upsert_vasana(&self, vasana: &Vasana) -> Result<(), StoreError> {
        let source_ids = serde_json::to_string(&vasana.source_samskara_ids)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO vasanas
                (id, name, description, valence, strength, stability, source_samskara_ids,
                 activation_count, last_activated_at, project)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                strength = excluded.strength,
                activation_count = excluded.activation_count,
                last_activated_at = excluded.last_activated_at,
                source_samskara_ids = excluded.source_samskara_ids",
        )
        .bind(vasana.id.to_string())
        .bind(&vasana.name)
        .bind(&vasana.description)
        .bind(valence_str(vasana.valence))
        .bind(vasana.strength)
        .bind(vasana.stability)
        .bind(source_ids)
        .bind(i64::from(vasana.activation_count))
        .bind(vasana.last_activated_at.to_rfc3339())
        .bind(&vasana.project)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn vidhi_by_name(&self, name: &str) -> Result<Option<Vidhi>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, steps, parameter_schema, trigger_phrases, success_rate,
                    success_count, failure_count, source_session_ids, confidence
             FROM vidhis WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Vidhi {
                id: parse_uuid(row.try_get("id")?)?,
                name: row.try_get("name")?,
                steps: json_or_default(&row.try_get::<String, _>("steps")?),
                parameter_schema: json_or_default(&row.try_get::<String, _>("parameter_schema")?),
                trigger_phrases: json_or_default(&row.try_get::<String, _>("trigger_phrases")?),
                success_rate: row.try_get("success_rate")?,
                success_count: row.try_get::<i64, _>("success_count")? as u32,
                failure_count: row.try_get::<i64, _>("failure_count")? as u32,
                source_session_ids: json_or_default(&row.try_get::<String, _>("source_session_ids")?),
                confidence: row.try_get("confidence")?,
            })
        })
        .transpose()
    }

    async fn upsert_vidhi(&self, vidhi: &Vidhi) -> Result<(), StoreError> {
        let steps = serde_json::to_string(&vidhi.steps).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let schema = serde_json::to_string(&vidhi.parameter_schema).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let phrases = serde_json::to_string(&vidhi.trigger_phrases).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let sources = serde_json::to_string(&vidhi.source_session_ids).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO vidhis
                (id, name, steps, parameter_schema, trigger_phrases, success_rate,
                 success_count, failure_count, source_session_ids, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(name) DO UPDATE SET
                steps = excluded.steps,
                parameter_schema = excluded.parameter_schema,
                success_rate = excluded.success_rate,
                success_count = excluded.success_count,
                failure_count = excluded.failure_count,
                source_session_ids = excluded.source_session_ids,
                confidence = excluded.confidence",
        )
        .bind(vidhi.id.to_string())
        .bind(&vidhi.name)
        .bind(steps)
        .bind(schema)
        .bind(phrases)
        .bind(vidhi.success_rate)
        .bind(i64::from(vidhi.success_count))
        .bind(i64::from(vidhi.failure_count))
        .bind(sources)
        .bind(vidhi.confidence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn graph_nodes_in_range(
        &self,
        project: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<GraphNode>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, project, label, created_at FROM graph_nodes
             WHERE ((?1 IS NULL AND project IS NULL) OR project = ?1)
               AND created_at >= ?2 AND created_at < ?3",
        )
        .bind(project)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(GraphNode {
                    id: parse_uuid(row.try_get("id")?)?,
                    project: row.try_get("project")?,
                    label: row.try_get("label")?,
                    created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn graph_edges_in_range(
        &self,
        project: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<GraphEdge>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, project, from_node, to_node, relation, created_at FROM graph_edges
             WHERE ((?1 IS NULL AND project IS NULL) OR project = ?1)
               AND created_at >= ?2 AND created_at < ?3",
        )
        .bind(project)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(GraphEdge {
                    id: parse_uuid(row.try_get("id")?)?,
                    project: row.try_get("project")?,
                    from_node: parse_uuid(row.try_get("from_node")?)?,
                    to_node: parse_uuid(row.try_get("to_node")?)?,
                    relation: row.try_get("relation")?,
                    created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn insert_audit_row(&self, row: &ConsolidationLogRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO consolidation_log
                (id, project, cycle_type, cycle_id, phase, phase_duration_ms, vasanas_created,
                 vidhis_created, samskaras_processed, sessions_processed, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(row.id.to_string())
        .bind(&row.project)
        .bind(row.cycle_type.as_str())
        .bind(&row.cycle_id)
        .bind(&row.phase)
        .bind(row.phase_duration_ms.map(|v| v as i64))
        .bind(i64::from(row.vasanas_created))
        .bind(i64::from(row.vidhis_created))
        .bind(i64::from(row.samskaras_processed))
        .bind(i64::from(row.sessions_processed))
        .bind(status_str(row.status))
        .bind(row.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_audit_row(&self, row: &ConsolidationLogRow) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE consolidation_log SET
                phase = ?2, phase_duration_ms = ?3, vasanas_created = ?4, vidhis_created = ?5,
                samskaras_processed = ?6, sessions_processed = ?7, status = ?8
             WHERE id = ?1",
        )
        .bind(row.id.to_string())
        .bind(&row.phase)
        .bind(row.phase_duration_ms.map(|v| v as i64))
        .bind(i64::from(row.vasanas_created))
        .bind(i64::from(row.vidhis_created))
        .bind(i64::from(row.samskaras_processed))
        .bind(i64::from(row.sessions_processed))
        .bind(status_str(row.status))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn load_nidra_state(&self) -> Result<NidraState, StoreError> {
        let row = sqlx::query(
            "SELECT consolidation_phase, consolidation_progress, updated_at FROM nidra_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(NidraState {
                consolidation_phase: row.try_get("consolidation_phase")?,
                consolidation_progress: row.try_get("consolidation_progress")?,
                updated_at: parse_datetime(&row.try_get::<String, _>("updated_at")?)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            }),
            None => Ok(NidraState::default()),
        }
    }

    async fn save_nidra_state(&self, state: &NidraState) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO nidra_state (id, consolidation_phase, consolidation_progress, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                consolidation_phase = excluded.consolidation_phase,
                consolidation_progress = excluded.consolidation_progress,
                updated_at = excluded.updated_at",
        )
        .bind(&state.consolidation_phase)
        .bind(state.consolidation_progress)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn status_str(status: CycleStatus) -> &'static str {
    match status {
        CycleStatus::Running => "running",
        CycleStatus::Success => "success",
        CycleStatus::Failed => "failed",
    }
}

fn parse_uuid(s: String) -> Result<Uuid, StoreError> {
    Uuid::parse_str(&s).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: parse_uuid(row.try_get("id")?)?,
        project: row.try_get("project")?,
        cost: row.try_get("cost")?,
        total_tokens: row.try_get::<i64, _>("total_tokens")? as u64,
        created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        updated_at: parse_datetime(&row.try_get::<String, _>("updated_at")?)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
    })
}
