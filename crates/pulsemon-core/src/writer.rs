//! Snapshot writer: the single consumer turning snapshot messages into
//! sink-visible output.
//!
//! Lifecycle: `spawn` starts the worker thread (only ever called when a
//! sink is enabled), `stop` enqueues a stop message and joins. The very
//! first tick the worker observes is baseline only; nothing is emitted
//! for it. Every distinct tick after that counts one completed
//! interval, shared across all sources funneled through this writer.
//!
//! Backpressure is the fail-fast policy: producers never block and
//! never drop, so a full queue means the consumer is permanently stuck
//! and the process terminates rather than buffer without bound.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{error, warn};

use crate::channel::{self, SnapshotReceiver, SnapshotSender, TrySendError};
use crate::config::{ConfigError, MetricsConfig};
use crate::fields::FieldMap;
use crate::output::{OutputError, RuleOutput, Severity};
use crate::ticker::Ticker;

/// Rule name attached to every rule-output record.
pub const SNAPSHOT_RULE: &str = "Pulsemon internal: metrics snapshot";
/// Message attached to every rule-output record.
pub const SNAPSHOT_MESSAGE: &str = "Pulsemon metrics snapshot";

/// One message through the snapshot queue. Owned by the channel until
/// dequeued, then by the worker; never shared.
#[derive(Debug, Clone)]
pub struct StatsMessage {
    /// Snapshot capture time, nanoseconds since epoch.
    pub ts_ns: u64,
    /// Label of the producing source.
    pub source: String,
    /// Stop marker; terminates the worker.
    pub stop: bool,
    /// Derived metric fields.
    pub fields: FieldMap,
}

impl StatsMessage {
    pub fn snapshot(ts_ns: u64, source: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            ts_ns,
            source: source.into(),
            stop: false,
            fields,
        }
    }

    fn stop_marker() -> Self {
        Self {
            ts_ns: 0,
            source: String::new(),
            stop: true,
            fields: FieldMap::new(),
        }
    }
}

/// Error type for writer startup and per-message dispatch.
#[derive(Debug)]
pub enum WriterError {
    /// Invalid configuration.
    Config(ConfigError),
    /// Neither the file sink nor rule output is enabled; the subsystem
    /// should not have been constructed.
    NoSinkEnabled,
    /// Rule output is enabled but no collaborator was supplied.
    MissingRuleOutput,
    /// The file sink could not be opened.
    OpenSink(PathBuf, std::io::Error),
    /// The worker thread could not be spawned.
    Spawn(std::io::Error),
    /// The rule-output collaborator rejected a record.
    Output(OutputError),
    /// A snapshot could not be serialized for the file sink.
    Serialize(serde_json::Error),
    /// The file sink rejected a write.
    Io(std::io::Error),
}

impl std::fmt::Display for WriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterError::Config(e) => write!(f, "{}", e),
            WriterError::NoSinkEnabled => write!(f, "no metrics sink enabled"),
            WriterError::MissingRuleOutput => {
                write!(f, "rule output enabled but no rule output configured")
            }
            WriterError::OpenSink(path, e) => {
                write!(f, "could not open metrics file {}: {}", path.display(), e)
            }
            WriterError::Spawn(e) => write!(f, "could not start writer thread: {}", e),
            WriterError::Output(e) => write!(f, "{}", e),
            WriterError::Serialize(e) => write!(f, "could not serialize snapshot: {}", e),
            WriterError::Io(e) => write!(f, "could not write snapshot: {}", e),
        }
    }
}

impl std::error::Error for WriterError {}

impl From<ConfigError> for WriterError {
    fn from(e: ConfigError) -> Self {
        WriterError::Config(e)
    }
}

impl From<OutputError> for WriterError {
    fn from(e: OutputError) -> Self {
        WriterError::Output(e)
    }
}

impl From<serde_json::Error> for WriterError {
    fn from(e: serde_json::Error) -> Self {
        WriterError::Serialize(e)
    }
}

/// One line of the file sink.
#[derive(Serialize)]
struct FileRecord<'a> {
    sample: u64,
    output_fields: &'a FieldMap,
}

/// Single consumer of the snapshot queue.
pub struct StatsWriter {
    config: Arc<MetricsConfig>,
    ticker: Arc<Ticker>,
    sender: SnapshotSender,
    rule_output: Option<Arc<dyn RuleOutput>>,
    total_samples: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StatsWriter {
    /// Validates the configuration, opens the file sink, and starts the
    /// worker thread.
    ///
    /// Any error here is a startup error: report it and leave the
    /// metrics subsystem disabled. The host process continues.
    pub fn spawn(
        config: Arc<MetricsConfig>,
        ticker: Arc<Ticker>,
        rule_output: Option<Arc<dyn RuleOutput>>,
    ) -> Result<Arc<StatsWriter>, WriterError> {
        config.validate()?;
        if !config.has_sink() {
            return Err(WriterError::NoSinkEnabled);
        }
        if config.rule_output_enabled && rule_output.is_none() {
            return Err(WriterError::MissingRuleOutput);
        }

        let file = match &config.output_file {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| WriterError::OpenSink(path.clone(), e))?,
            ),
            None => None,
        };

        let (sender, receiver) = channel::bounded(config.queue_capacity);
        let total_samples = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            receiver,
            file,
            rule_output: if config.rule_output_enabled {
                rule_output.clone()
            } else {
                None
            },
            ticker: Arc::clone(&ticker),
            total_samples: Arc::clone(&total_samples),
        };
        let handle = thread::Builder::new()
            .name("pulsemon-writer".to_string())
            .spawn(move || worker.run())
            .map_err(WriterError::Spawn)?;

        Ok(Arc::new(StatsWriter {
            config,
            ticker,
            sender,
            rule_output,
            total_samples,
            worker: Mutex::new(Some(handle)),
        }))
    }

    pub fn config(&self) -> &Arc<MetricsConfig> {
        &self.config
    }

    pub fn ticker(&self) -> &Arc<Ticker> {
        &self.ticker
    }

    /// Completed sampling intervals observed so far.
    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::Relaxed)
    }

    /// Dropped-record count of the downstream rule-output queue.
    pub fn queue_drops(&self) -> u64 {
        self.rule_output.as_deref().map_or(0, RuleOutput::queue_drops)
    }

    /// Enqueues a snapshot message, applying the fail-fast saturation
    /// policy: a full queue terminates the process, because it means
    /// the consumer is permanently unable to keep pace and silent
    /// metric loss is worse than a crash for a monitoring agent.
    pub fn push(&self, msg: StatsMessage) {
        match self.sender.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                error!("metrics queue reached maximum capacity, exiting");
                eprintln!("Fatal error: metrics queue reached maximum capacity. Exiting.");
                std::process::exit(1);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("metrics snapshot dropped: writer already stopped");
            }
        }
    }

    /// Stops the worker: enqueues the stop marker behind all pending
    /// snapshots and joins the thread. Nothing is dispatched after
    /// stop. Idempotent.
    pub fn stop(&self) {
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            self.push(StatsMessage::stop_marker());
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for StatsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsWriter")
            .field("config", &self.config)
            .field("ticker", &self.ticker)
            .field("total_samples", &self.total_samples)
            .finish_non_exhaustive()
    }
}

impl Drop for StatsWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    receiver: SnapshotReceiver,
    file: Option<File>,
    rule_output: Option<Arc<dyn RuleOutput>>,
    ticker: Arc<Ticker>,
    total_samples: Arc<AtomicU64>,
}

impl Worker {
    fn run(mut self) {
        let first_tick = self.ticker.current();
        let mut last_tick = first_tick;

        while let Some(msg) = self.receiver.recv() {
            if msg.stop {
                return;
            }

            // Messages produced before the first full interval only
            // establish the baseline; nothing is emitted for them.
            let tick = self.ticker.current();
            if first_tick == tick {
                continue;
            }
            if last_tick != tick {
                self.total_samples.fetch_add(1, Ordering::Relaxed);
            }
            last_tick = tick;

            // A bad snapshot or transient sink failure must not kill
            // the consumer thread: log and move on.
            if let Err(e) = self.dispatch(&msg) {
                error!("stats writer: {}", e);
            }
        }
    }

    fn dispatch(&mut self, msg: &StatsMessage) -> Result<(), WriterError> {
        if let Some(rule_output) = &self.rule_output {
            rule_output.emit(
                msg.ts_ns,
                Severity::Informational,
                SNAPSHOT_MESSAGE,
                SNAPSHOT_RULE,
                &msg.fields,
            )?;
        }

        if let Some(file) = &mut self.file {
            let record = FileRecord {
                sample: self.total_samples.load(Ordering::Relaxed),
                output_fields: &msg.fields,
            };
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');
            file.write_all(line.as_bytes()).map_err(WriterError::Io)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldValue;
    use std::sync::Mutex;
    use std::time::Duration;

    fn file_config(path: &std::path::Path) -> Arc<MetricsConfig> {
        Arc::new(MetricsConfig {
            enabled: true,
            output_file: Some(path.to_path_buf()),
            queue_capacity: 64,
            ..MetricsConfig::default()
        })
    }

    fn msg_with_field(ts_ns: u64, value: u64) -> StatsMessage {
        let mut fields = FieldMap::new();
        fields.set("agent.num_evts", FieldValue::U64(value));
        StatsMessage::snapshot(ts_ns, "syscall", fields)
    }

    #[test]
    fn spawn_requires_a_sink() {
        let config = Arc::new(MetricsConfig {
            enabled: true,
            ..MetricsConfig::default()
        });
        let err = StatsWriter::spawn(config, Arc::new(Ticker::new()), None).unwrap_err();
        assert!(matches!(err, WriterError::NoSinkEnabled));
    }

    #[test]
    fn spawn_requires_rule_output_when_enabled() {
        let config = Arc::new(MetricsConfig {
            enabled: true,
            rule_output_enabled: true,
            ..MetricsConfig::default()
        });
        let err = StatsWriter::spawn(config, Arc::new(Ticker::new()), None).unwrap_err();
        assert!(matches!(err, WriterError::MissingRuleOutput));
    }

    #[test]
    fn spawn_reports_unopenable_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("metrics.jsonl");
        let err =
            StatsWriter::spawn(file_config(&path), Arc::new(Ticker::new()), None).unwrap_err();
        assert!(matches!(err, WriterError::OpenSink(_, _)));
    }

    /// Polls until the file sink holds `lines` lines, bounded so a
    /// regression fails instead of hanging.
    fn wait_for_lines(path: &std::path::Path, lines: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let count = std::fs::read_to_string(path)
                .map(|s| s.lines().count())
                .unwrap_or(0);
            if count >= lines {
                return;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "writer never produced {} lines",
                lines
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn baseline_tick_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let ticker = Arc::new(Ticker::new());
        ticker.advance();
        ticker.advance();
        // Worker starts on tick 2; the tick never moves again, so every
        // message belongs to the baseline interval.
        let writer = StatsWriter::spawn(file_config(&path), ticker, None).unwrap();

        writer.push(msg_with_field(1, 100));
        writer.push(msg_with_field(2, 150));
        writer.stop();

        assert_eq!(writer.total_samples(), 0);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.is_empty(), "baseline messages must not be written");
    }

    #[test]
    fn intervals_count_once_per_distinct_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let ticker = Arc::new(Ticker::new());
        let writer = StatsWriter::spawn(file_config(&path), Arc::clone(&ticker), None).unwrap();

        ticker.advance();
        writer.push(msg_with_field(2, 150));
        writer.push(msg_with_field(3, 150)); // same tick, second source
        // Ensure both messages are processed before the tick moves, so
        // their interval attribution is deterministic.
        wait_for_lines(&path, 2);

        ticker.advance();
        writer.push(msg_with_field(4, 200));
        writer.stop();

        assert_eq!(writer.total_samples(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["sample"], 1);
        assert_eq!(first["output_fields"]["agent.num_evts"], 150);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["sample"], 1, "same tick shares the sample counter");
        let third: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(third["sample"], 2);
    }

    #[test]
    fn push_after_stop_is_dropped_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let ticker = Arc::new(Ticker::new());
        let writer = StatsWriter::spawn(file_config(&path), ticker, None).unwrap();

        writer.stop();
        writer.push(msg_with_field(1, 1));
        writer.stop(); // idempotent
    }

    /// Rule output that fails on demand and records emit attempts.
    struct FlakyRuleOutput {
        fail_next: Mutex<bool>,
        attempts: Mutex<u64>,
        emitted: Mutex<Vec<String>>,
        drops: u64,
    }

    impl RuleOutput for FlakyRuleOutput {
        fn emit(
            &self,
            _ts_ns: u64,
            severity: Severity,
            message: &str,
            rule: &str,
            _fields: &FieldMap,
        ) -> Result<(), OutputError> {
            assert_eq!(severity, Severity::Informational);
            assert_eq!(message, SNAPSHOT_MESSAGE);
            *self.attempts.lock().unwrap() += 1;
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(OutputError::new("sink wedged"));
            }
            self.emitted.lock().unwrap().push(rule.to_string());
            Ok(())
        }

        fn queue_drops(&self) -> u64 {
            self.drops
        }
    }

    impl FlakyRuleOutput {
        fn wait_for_attempts(&self, attempts: u64) {
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while *self.attempts.lock().unwrap() < attempts {
                assert!(
                    std::time::Instant::now() < deadline,
                    "writer never attempted {} emits",
                    attempts
                );
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    #[test]
    fn sink_error_is_logged_and_worker_continues() {
        let rule_output = Arc::new(FlakyRuleOutput {
            fail_next: Mutex::new(true),
            attempts: Mutex::new(0),
            emitted: Mutex::new(Vec::new()),
            drops: 7,
        });
        let config = Arc::new(MetricsConfig {
            enabled: true,
            rule_output_enabled: true,
            queue_capacity: 64,
            ..MetricsConfig::default()
        });
        let ticker = Arc::new(Ticker::new());
        let writer = StatsWriter::spawn(
            config,
            Arc::clone(&ticker),
            Some(rule_output.clone() as Arc<dyn RuleOutput>),
        )
        .unwrap();

        assert_eq!(writer.queue_drops(), 7);

        ticker.advance();
        writer.push(msg_with_field(1, 1)); // emit fails, worker survives
        rule_output.wait_for_attempts(1);
        ticker.advance();
        writer.push(msg_with_field(2, 2)); // emit succeeds
        writer.stop();

        let emitted = rule_output.emitted.lock().unwrap();
        assert_eq!(emitted.as_slice(), [SNAPSHOT_RULE.to_string()]);
        // The interval counter is independent of dispatch outcomes.
        assert_eq!(writer.total_samples(), 2);
    }

    #[test]
    fn worker_exits_when_all_senders_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let ticker = Arc::new(Ticker::new());
        let writer = StatsWriter::spawn(file_config(&path), ticker, None).unwrap();

        // Dropping the writer stops the worker via the stop marker;
        // bounded wait so a regression fails fast instead of hanging.
        let start = std::time::Instant::now();
        drop(writer);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
