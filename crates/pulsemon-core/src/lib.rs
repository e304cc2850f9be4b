//! pulsemon-core — fixed-cadence metrics sampling and delivery
//! pipeline for a long-running monitoring agent.
//!
//! Provides:
//! - `ticker` — wait-free sampling cadence counter plus its timer
//! - `channel` — bounded snapshot handoff to the writer thread
//! - `collector` — per-source metric derivation gated on tick changes
//! - `writer` — single consumer dispatching snapshots to sinks
//! - `fields` — insertion-ordered metric field mapping
//! - `engine` — capture-engine collaborator interface (plus a mock)
//! - `output` — rule-output collaborator interface
//! - `config` — subsystem options and validation
//!
//! Call sites hand raw counters to a [`collector::StatsCollector`] as
//! often as they like; derivation runs at most once per ticker interval
//! and never blocks the caller on I/O. A full snapshot queue is fatal
//! by policy: for a monitoring agent, crash-and-restart beats silent
//! metric loss or unbounded buffering.

pub mod channel;
pub mod collector;
pub mod config;
pub mod engine;
pub mod fields;
pub mod output;
pub mod ticker;
pub mod writer;

pub use collector::StatsCollector;
pub use config::MetricsConfig;
pub use ticker::Ticker;
pub use writer::StatsWriter;
