//! Knowledge-graph substore models (§6.1: "a graph substore with
//! `nodes`/`edges` tables"). The report synthesizer (Component E) counts
//! nodes/edges added within a reporting window; nothing in this crate
//! interprets the graph's structure beyond that count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: Uuid,
    pub project: Option<String>,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: Uuid,
    pub project: Option<String>,
    pub from_node: Uuid,
    pub to_node: Uuid,
    pub relation: String,
    pub created_at: DateTime<Utc>,
}
