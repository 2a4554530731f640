//! Relational store port (§6.1: "Relational store").
//!
//! Only the relational *shape* is normative (§10.5): tables for sessions,
//! turns, samskaras, vasanas, vidhis, consolidation_log, nidra_state, and a
//! graph substore (nodes/edges). The SQLite schema as a filesystem artifact
//! is explicitly out of scope (§1) — this port is the actual contract the
//! consolidation pipeline and report synthesizer depend on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    ConsolidationLogRow, GraphEdge, GraphNode, NidraState, Samskara, Session, Turn, Vasana, Vidhi,
};

/// Time-bounded, project-scoped reads and the transactional writes the
/// consolidation pipeline and report synthesizer need. Implementations
/// must provide indexed lookups by project and time (§6.1).
#[async_trait]
pub trait ConsolidationStore: Send + Sync {
    async fn recent_sessions(&self, project: Option<&str>, limit: u32) -> Result<Vec<Session>, StoreError>;

    async fn sessions_in_range(
        &self,
        project: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;

    async fn turns_for_session(&self, session_id: Uuid) -> Result<Vec<Turn>, StoreError>;

    async fn samskaras(&self, project: Option<&str>, min_observation_count: u32) -> Result<Vec<Samskara>, StoreError>;

    async fn upsert_samskara(&self, samskara: &Samskara) -> Result<(), StoreError>;

    async fn vasanas(&self, project: Option<&str>) -> Result<Vec<Vasana>, StoreError>;

    async fn upsert_vasana(&self, vasana: &Vasana) -> Result<(), StoreError>;

    async fn vidhi_by_name(&self, name: &str) -> Result<Option<Vidhi>, StoreError>;

    async fn upsert_vidhi(&self, vidhi: &Vidhi) -> Result<(), StoreError>;

    async fn graph_nodes_in_range(
        &self,
        project: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<GraphNode>, StoreError>;

    async fn graph_edges_in_range(
        &self,
        project: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<GraphEdge>, StoreError>;

    async fn insert_audit_row(&self, row: &ConsolidationLogRow) -> Result<(), StoreError>;

    async fn update_audit_row(&self, row: &ConsolidationLogRow) -> Result<(), StoreError>;

    async fn load_nidra_state(&self) -> Result<NidraState, StoreError>;

    async fn save_nidra_state(&self, state: &NidraState) -> Result<(), StoreError>;
}
