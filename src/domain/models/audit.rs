//! Audit trail domain models: `consolidation_log` rows and the
//! `nidra_state` singleton (§6.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which recurring job wrote this audit row (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleType {
    Svapna,
    Monthly,
    Yearly,
}

impl CycleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Svapna => "svapna",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

/// Lifecycle status of a cycle row (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Success,
    Failed,
}

/// One `consolidation_log` row (§6.3). Shared by the svapna pipeline and
/// the report synthesizer — the latter reuses this table with
/// `cycle_type` set to `monthly`/`yearly` rather than a separate table
/// (§11 supplemented features).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationLogRow {
    pub id: Uuid,
    pub project: Option<String>,
    pub cycle_type: CycleType,
    pub cycle_id: String,
    pub phase: Option<String>,
    pub phase_duration_ms: Option<u64>,
    pub vasanas_created: u32,
    pub vidhis_created: u32,
    pub samskaras_processed: u32,
    pub sessions_processed: u32,
    pub status: CycleStatus,
    pub created_at: DateTime<Utc>,
}

impl ConsolidationLogRow {
    pub fn running(project: Option<String>, cycle_type: CycleType, cycle_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project,
            cycle_type,
            cycle_id: cycle_id.into(),
            phase: None,
            phase_duration_ms: None,
            vasanas_created: 0,
            vidhis_created: 0,
            samskaras_processed: 0,
            sessions_processed: 0,
            status: CycleStatus::Running,
            created_at: Utc::now(),
        }
    }
}

/// Singleton progress row updated at the start and end of every svapna
/// cycle (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NidraState {
    pub consolidation_phase: Option<String>,
    /// Always in `[0, 1]`.
    pub consolidation_progress: f64,
    pub updated_at: DateTime<Utc>,
}

impl Default for NidraState {
    fn default() -> Self {
        Self { consolidation_phase: None, consolidation_progress: 0.0, updated_at: Utc::now() }
    }
}
