use async_trait::async_trait;

use dockwatch_types::{Fingerprint, Incident, LogLine};

/// Errors from the incident persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum IncidentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid group name: {group:?}")]
    InvalidGroup { group: String },
}

/// Consumer of detected errors.
#[async_trait]
pub trait IncidentSink: Send + Sync + 'static {
    /// Durably record an incident unless one already exists for this
    /// `(group, hash, day)`. Returns `None` when it already exists.
    async fn create_if_absent(
        &self,
        group: &str,
        fingerprint: &Fingerprint,
        line: &LogLine,
        context_lines: &[String],
    ) -> Result<Option<Incident>, IncidentError>;

    /// Mark today's incident for `hash` as dismissed. Returns `false` if
    /// there is none.
    async fn dismiss(&self, group: &str, hash: &str) -> Result<bool, IncidentError>;
}
