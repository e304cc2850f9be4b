//! Per-source stateful metrics collector.
//!
//! Each event source owns one `StatsCollector`. A call to `sample` is
//! cheap and non-blocking: it returns immediately unless the ticker has
//! advanced since this collector's last observation, so call sites can
//! invoke it on every event-loop iteration. When a new tick is
//! detected, raw engine counters are turned into derived metrics
//! (rates, percentages, unit conversions) against the previous
//! observation and the snapshot is handed to the writer queue.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::{CaptureEngine, CounterValue, SYSCALL_SOURCE};
use crate::fields::{FieldMap, FieldValue};
use crate::writer::{StatsMessage, StatsWriter};

const NS_PER_SEC: u64 = 1_000_000_000;

/// Exact-match counter name converted MiB-wise (1024²) when memory
/// conversion is on; stays integral.
const CONTAINER_MEMORY_FIELD: &str = "container_memory_used";
/// Prefix-match counter names converted KiB-wise (1024) when memory
/// conversion is on.
const MEMORY_FIELD_PREFIX: &str = "memory_";

/// Rounds a rate to one decimal place.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Per-source collector. All previous-value state is private to one
/// instance; instances share only the ticker and the writer queue.
pub struct StatsCollector {
    writer: Arc<StatsWriter>,
    last_tick: u64,
    /// Wall-clock time of the previous sample, ns since epoch. Zero
    /// means no previous sample, so no rates on the first call.
    last_sample_ns: u64,
    last_num_evts: u64,
    last_driver_evts: u64,
    last_driver_drops: u64,
}

impl StatsCollector {
    pub fn new(writer: Arc<StatsWriter>) -> Self {
        Self {
            writer,
            last_tick: 0,
            last_sample_ns: 0,
            last_num_evts: 0,
            last_driver_evts: 0,
            last_driver_drops: 0,
        }
    }

    /// Samples the engine once per ticker interval.
    ///
    /// `num_evts` is the running count of userspace events processed
    /// for this source; `now` is the snapshot wall-clock instant.
    /// Returns without doing any work when the tick has not changed
    /// since the previous call.
    pub fn sample(
        &mut self,
        engine: &dyn CaptureEngine,
        source: &str,
        num_evts: u64,
        now: SystemTime,
    ) {
        let tick = self.writer.ticker().current();
        if tick == self.last_tick {
            return;
        }
        self.last_tick = tick;

        let now_ns = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let delta_ns = if self.last_sample_ns != 0 {
            now_ns.wrapping_sub(self.last_sample_ns)
        } else {
            0
        };
        self.last_sample_ns = now_ns;
        let delta_sec = delta_ns as f64 / NS_PER_SEC as f64;

        let mut fields = FieldMap::new();
        self.wrapper_fields(&mut fields, engine, now_ns, source, num_evts, delta_sec);
        self.runtime_counter_fields(&mut fields, engine);
        self.driver_counter_fields(&mut fields, engine, source, delta_sec);

        self.writer
            .push(StatsMessage::snapshot(now_ns, source, fields));
    }

    /// Identity/context fields plus the userspace event counters.
    /// Always present regardless of category selection.
    fn wrapper_fields(
        &mut self,
        fields: &mut FieldMap,
        engine: &dyn CaptureEngine,
        now_ns: u64,
        source: &str,
        num_evts: u64,
        delta_sec: f64,
    ) {
        let agent = engine.agent_info();
        let machine = engine.machine_info();

        fields.set("evt.time", FieldValue::U64(now_ns));
        fields.set("agent.version", FieldValue::Str(agent.version));
        fields.set("agent.start_ts", FieldValue::U64(agent.start_ts_epoch));
        fields.set(
            "agent.duration_sec",
            FieldValue::U64(now_ns.saturating_sub(agent.start_ts_epoch) / NS_PER_SEC),
        );
        fields.set("agent.kernel_release", FieldValue::Str(agent.kernel_release));
        fields.set("agent.host_boot_ts", FieldValue::U64(machine.boot_ts_epoch));
        fields.set("agent.hostname", FieldValue::Str(machine.hostname));
        fields.set("agent.host_num_cpus", FieldValue::U32(machine.num_cpus));
        fields.set(
            "agent.outputs_queue_num_drops",
            FieldValue::U64(self.writer.queue_drops()),
        );
        fields.set("evt.source", FieldValue::from(source));
        fields.set("engine.name", FieldValue::from(engine.engine_name()));

        // Rate only when a previous count exists and the denominator is
        // strictly positive; raw current/previous counts always go out.
        if self.last_num_evts != 0 && delta_sec > 0.0 {
            let delta = num_evts.wrapping_sub(self.last_num_evts);
            fields.set(
                "agent.evts_rate_sec",
                FieldValue::F64(round1(delta as f64 / delta_sec)),
            );
        }
        fields.set("agent.num_evts", FieldValue::U64(num_evts));
        fields.set("agent.num_evts_prev", FieldValue::U64(self.last_num_evts));
        self.last_num_evts = num_evts;
    }

    /// Engine/runtime counters under the `agent.` prefix, with
    /// zero-suppression and memory-unit conversion.
    fn runtime_counter_fields(&self, fields: &mut FieldMap, engine: &dyn CaptureEngine) {
        let config = self.writer.config();
        for counter in engine.runtime_counters(config.categories) {
            let field_name = format!("agent.{}", counter.name);

            // n_fds and n_threads carry structural meaning and are
            // exempt from zero-suppression.
            if matches!(counter.name.as_str(), "n_fds" | "n_threads")
                && let CounterValue::U64(v) = counter.value
            {
                fields.set(&field_name, FieldValue::U64(v));
            }

            match counter.value {
                CounterValue::U64(v) => {
                    if v == 0 && !config.include_empty_values {
                        continue;
                    }
                    let converted = if config.convert_memory_units {
                        if counter.name == CONTAINER_MEMORY_FIELD {
                            (v as f64 / 1024.0 / 1024.0) as u64
                        } else if counter.name.starts_with(MEMORY_FIELD_PREFIX) {
                            (v as f64 / 1024.0) as u64
                        } else {
                            v
                        }
                    } else {
                        v
                    };
                    fields.set(&field_name, FieldValue::U64(converted));
                }
                CounterValue::U32(v) => {
                    if v == 0 && !config.include_empty_values {
                        continue;
                    }
                    let converted = if config.convert_memory_units
                        && counter.name.starts_with(MEMORY_FIELD_PREFIX)
                    {
                        (v as f64 / 1024.0) as u32
                    } else {
                        v
                    };
                    fields.set(&field_name, FieldValue::U32(converted));
                }
                CounterValue::Double(v) => {
                    if v == 0.0 && !config.include_empty_values {
                        continue;
                    }
                    fields.set(&field_name, FieldValue::F64(v));
                }
            }
        }
    }

    /// Kernel-side/driver counters under the `driver.` prefix, only for
    /// the primary syscall-capture source. The event/drop pair is
    /// always reported with previous values and derived rates; the drop
    /// percentage depends on totals accumulated during the loop and is
    /// computed once afterwards.
    fn driver_counter_fields(
        &mut self,
        fields: &mut FieldMap,
        engine: &dyn CaptureEngine,
        source: &str,
        delta_sec: f64,
    ) {
        if source != SYSCALL_SOURCE {
            return;
        }
        let config = self.writer.config();
        let counters = engine.driver_counters(config.categories);
        if counters.is_empty() {
            return;
        }

        let mut evts_delta: u64 = 0;
        let mut drops_delta: u64 = 0;

        for counter in &counters {
            // Driver counters are 64-bit; other tags are not expected
            // on this path and are skipped.
            let CounterValue::U64(v) = counter.value else {
                continue;
            };
            let field_name = format!("driver.{}", counter.name);

            if counter.name == "n_evts" {
                fields.set(&field_name, FieldValue::U64(v));
                fields.set("driver.n_evts_prev", FieldValue::U64(self.last_driver_evts));
                evts_delta = v.wrapping_sub(self.last_driver_evts);
                let rate = if evts_delta != 0 && delta_sec > 0.0 {
                    round1(evts_delta as f64 / delta_sec)
                } else {
                    0.0
                };
                fields.set("driver.evts_rate_sec", FieldValue::F64(rate));
                self.last_driver_evts = v;
            } else if counter.name == "n_drops" {
                fields.set(&field_name, FieldValue::U64(v));
                fields.set(
                    "driver.n_drops_prev",
                    FieldValue::U64(self.last_driver_drops),
                );
                drops_delta = v.wrapping_sub(self.last_driver_drops);
                let rate = if drops_delta != 0 && delta_sec > 0.0 {
                    round1(drops_delta as f64 / delta_sec)
                } else {
                    0.0
                };
                fields.set("driver.evts_drop_rate_sec", FieldValue::F64(rate));
                self.last_driver_drops = v;
            }

            if v == 0 && !config.include_empty_values {
                continue;
            }
            fields.set(&field_name, FieldValue::U64(v));
        }

        let drops_perc = if evts_delta > 0 {
            100.0 * drops_delta as f64 / evts_delta as f64
        } else {
            0.0
        };
        fields.set("driver.n_drops_perc", FieldValue::F64(drops_perc));
    }
}
