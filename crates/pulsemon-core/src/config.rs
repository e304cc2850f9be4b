//! Metrics subsystem configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::CategoryFlags;

/// Configuration error, reported synchronously at startup. A failed
/// validation disables the subsystem; the host process continues.
#[derive(Debug)]
pub enum ConfigError {
    /// The sampling interval is zero.
    BadInterval,
    /// The snapshot queue capacity is zero.
    BadCapacity,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::BadInterval => {
                write!(f, "metrics interval must be greater than zero")
            }
            ConfigError::BadCapacity => {
                write!(f, "metrics queue capacity must be greater than zero")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Options for the metrics sampling pipeline.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Master switch. When off the subsystem is never constructed.
    pub enabled: bool,
    /// Sampling interval driving the ticker.
    pub interval: Duration,
    /// Append-mode file sink, one JSON record per line. `None` disables
    /// the file sink.
    pub output_file: Option<PathBuf>,
    /// Whether snapshots are also dispatched through the rule-output
    /// collaborator.
    pub rule_output_enabled: bool,
    /// Fixed snapshot queue capacity.
    pub queue_capacity: usize,
    /// Report zero-valued counters instead of suppressing them.
    pub include_empty_values: bool,
    /// Convert memory-valued fields to higher units (KiB / MiB).
    pub convert_memory_units: bool,
    /// Which counter categories the engine should include.
    pub categories: CategoryFlags,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(10),
            output_file: None,
            rule_output_enabled: false,
            queue_capacity: 1000,
            include_empty_values: false,
            convert_memory_units: false,
            categories: CategoryFlags::all(),
        }
    }
}

impl MetricsConfig {
    /// Returns whether at least one sink is enabled. With no sink the
    /// subsystem is inert and should not be constructed at all.
    pub fn has_sink(&self) -> bool {
        self.rule_output_enabled || self.output_file.is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::BadInterval);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::BadCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_but_sinkless() {
        let config = MetricsConfig::default();
        config.validate().unwrap();
        assert!(!config.has_sink());
    }

    #[test]
    fn zero_interval_is_a_config_error() {
        let config = MetricsConfig {
            interval: Duration::ZERO,
            ..MetricsConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadInterval)));
    }

    #[test]
    fn zero_capacity_is_a_config_error() {
        let config = MetricsConfig {
            queue_capacity: 0,
            ..MetricsConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadCapacity)));
    }

    #[test]
    fn any_sink_counts() {
        let file_only = MetricsConfig {
            output_file: Some(PathBuf::from("/tmp/metrics.jsonl")),
            ..MetricsConfig::default()
        };
        assert!(file_only.has_sink());

        let rule_only = MetricsConfig {
            rule_output_enabled: true,
            ..MetricsConfig::default()
        };
        assert!(rule_only.has_sink());
    }
}
