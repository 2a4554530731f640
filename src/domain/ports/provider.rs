//! LLM provider port (§6.1: "Consumed by the core — LLM provider").
//!
//! The provider itself (model weights, API client) is explicitly out of
//! scope (§1); this crate only depends on the shape it offers: an id, a
//! model list, and a streaming call that the resilient transport (Component
//! C) wraps with retry and circuit-breaking.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::domain::error::ProviderError;

/// One event in a provider's response stream. The exact shape of a token
/// delta is provider-specific and opaque to this crate; only enough
/// structure to drive retry/circuit decisions is modeled here.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delta(Value),
    Done,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;

    fn models(&self) -> &[String];

    /// Open a streamed call. A raw `Err` here is the unclassified transport
    /// failure; `services::transport::classify` maps it onto
    /// `ProviderError` before any caller above the transport boundary sees
    /// it (§4.3).
    async fn create_stream(
        &self,
        context: Value,
        options: Value,
    ) -> Result<BoxStream<'static, Result<StreamEvent, ProviderError>>, ProviderError>;
}
