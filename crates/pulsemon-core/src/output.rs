//! Structured-output collaborator interface.
//!
//! The alerting/rule-output subsystem renders one snapshot as a log
//! entry. The pipeline only needs a single `emit` call plus a read of
//! the collaborator's dropped-message counter, which is folded back
//! into every snapshot as `agent.outputs_queue_num_drops`.

use crate::fields::FieldMap;

/// Severity attached to an emitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Informational,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Informational => "informational",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Error raised by a sink while emitting a record.
#[derive(Debug)]
pub struct OutputError {
    message: String,
}

impl OutputError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "output error: {}", self.message)
    }
}

impl std::error::Error for OutputError {}

/// Rule-output collaborator.
pub trait RuleOutput: Send + Sync {
    /// Emits one structured record.
    fn emit(
        &self,
        ts_ns: u64,
        severity: Severity,
        message: &str,
        rule: &str,
        fields: &FieldMap,
    ) -> Result<(), OutputError>;

    /// Running count of records the collaborator has dropped on its own
    /// output queue.
    fn queue_drops(&self) -> u64 {
        0
    }
}

/// Default rule output that forwards snapshots to the host's tracing
/// stream. Never drops.
#[derive(Debug, Default)]
pub struct LogRuleOutput;

impl RuleOutput for LogRuleOutput {
    fn emit(
        &self,
        ts_ns: u64,
        severity: Severity,
        message: &str,
        rule: &str,
        fields: &FieldMap,
    ) -> Result<(), OutputError> {
        let rendered = serde_json::to_string(fields).map_err(|e| OutputError::new(e.to_string()))?;
        let time = chrono::DateTime::from_timestamp_nanos(ts_ns as i64).to_rfc3339();
        match severity {
            Severity::Informational => {
                tracing::info!(%time, rule, fields = %rendered, "{}", message)
            }
            Severity::Warning => tracing::warn!(%time, rule, fields = %rendered, "{}", message),
            Severity::Error => tracing::error!(%time, rule, fields = %rendered, "{}", message),
        }
        Ok(())
    }
}
