//! Observability module for correlation and tracing

use serde::{Deserialize, Serialize};
use tracing::{info_span, Span};
use uuid::Uuid;

/// Correlation ID for tracking one run across log lines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context attached to every orchestrator run
///
/// The run id shows up on every event emitted inside [`RunContext::span`],
/// which makes a single run greppable in JSON logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: CorrelationId,

    /// Operation name, e.g. `transfer_batch`
    pub operation: String,

    /// Creation timestamp (Unix epoch seconds)
    pub started_at: u64,
}

impl RunContext {
    pub fn new(operation: &str) -> Self {
        let started_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            run_id: CorrelationId::new(),
            operation: operation.to_string(),
            started_at,
        }
    }

    pub fn span(&self) -> Span {
        info_span!(
            "run",
            run_id = %self.run_id,
            operation = %self.operation,
            started_at = self.started_at
        )
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new("run")
    }
}
