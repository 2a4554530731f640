//! Session and turn domain models — the raw material the consolidation
//! pipeline (Component D) replays (§4.4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single tool invocation within a turn (§4.4.1, §4.4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: Value,
    pub succeeded: bool,
}

/// One turn of a session (§4.4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Length-deviation proxy used by REPLAY when a turn has no tool calls
    /// (§4.4.1): `min(|len - avg_len| / max(avg_len, 1), 5)`.
    pub fn length_deviation_proxy(&self, avg_len: f64) -> f64 {
        let len = self.content.len() as f64;
        let denom = avg_len.max(1.0);
        ((len - avg_len).abs() / denom).min(5.0)
    }
}

/// A session is the unit the consolidation pipeline loads in batches of
/// `maxSessionsPerCycle` (§4.4.1, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub project: Option<String>,
    pub cost: f64,
    pub total_tokens: u64,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
