//! Domain error types for the Nidra orchestration core.
//!
//! Each error enum covers errors from one of the four subsystems (§7 of the
//! design spec). Provider errors are classified once at the transport
//! boundary (see `services::transport::classify`); everything above that
//! boundary only ever sees a `ProviderError` variant, never a raw transport
//! failure.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the task scheduler (Component A) and agent pool (B).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// A task with the given ID was not found in the current plan.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A task's dependency list can never be satisfied (e.g. depends on a
    /// task id that was cancelled or never submitted).
    #[error("task {0} depends on unsatisfiable task {1}")]
    DependencyUnsatisfiable(String, String),

    /// `scaleAgent` (or routing) referenced a slot id that does not exist
    /// in the plan. Per §7 this is a caller error, thrown at the call site.
    #[error("unknown agent slot: {0}")]
    UnknownAgentSlot(String),

    /// An operation was attempted while the orchestrator was in a state
    /// that does not permit it (e.g. `submit` after `stop`).
    #[error("orchestrator is not in a valid state for this operation: {0}")]
    InvalidState(String),

    /// A task exhausted its retry budget and has no fallback.
    #[error("task {0} failed permanently: {1}")]
    TaskFailed(String, String),
}

impl OrchestratorError {
    /// Whether this error reflects a caller mistake rather than a runtime
    /// failure (useful for deciding whether to surface it synchronously).
    pub const fn is_caller_error(&self) -> bool {
        matches!(self, Self::UnknownAgentSlot(_))
    }
}

/// Canonical provider error taxonomy (§4.3, §7). Every raw transport error
/// is classified into exactly one of these before it crosses the transport
/// boundary.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCategory {
    #[error("rate limited")]
    RateLimit,
    #[error("authentication failed")]
    Auth,
    #[error("invalid request")]
    InvalidRequest,
    #[error("context length exceeded")]
    ContextLength,
    #[error("content filtered")]
    ContentFilter,
    #[error("server error")]
    ServerError,
    #[error("network error")]
    Network,
    #[error("timeout")]
    Timeout,
    #[error("overloaded")]
    Overloaded,
    #[error("unknown provider error")]
    Unknown,
}

impl ProviderErrorCategory {
    /// Whether the retry policy (§4.3) should retry this category at all.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Overloaded | Self::ServerError | Self::Network | Self::Timeout
        )
    }
}

/// A classified provider error, carrying the category plus enough context
/// to act on it (§7: "callers see only the canonical category").
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{category}: {message}")]
pub struct ProviderError {
    pub category: ProviderErrorCategory,
    pub message: String,
    /// Parsed "retry after" hint in milliseconds, rate_limit only (§4.3).
    pub retry_after_ms: Option<u64>,
}

impl ProviderError {
    pub fn new(category: ProviderErrorCategory, message: impl Into<String>) -> Self {
        Self { category, message: message.into(), retry_after_ms: None }
    }

    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub const fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

/// Raised by `allowRequest` (§4.3, §7) when a circuit is open.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("circuit open for provider {provider}, retry after {retry_after}")]
pub struct CircuitOpenError {
    pub provider: String,
    pub retry_after: DateTime<Utc>,
}

/// Errors raised by the consolidation pipeline (Component D) and report
/// synthesizer (Component E) while reading from or writing to the
/// relational store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error writing artifact: {0}")]
    Io(#[from] std::io::Error),
}
