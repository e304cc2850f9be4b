//! pulsemond - periodic metrics snapshot daemon.
//!
//! Embeds the pulsemon sampling pipeline around a procfs capture
//! engine: a fixed-interval ticker gates snapshot derivation, a single
//! writer thread delivers snapshots to the rule output (tracing) and/or
//! an append-only JSON-lines file.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod engine;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use clap::Parser;
use tracing::{Level, debug, error, info};
use tracing_subscriber::EnvFilter;

use pulsemon_core::engine::CategoryFlags;
use pulsemon_core::output::{LogRuleOutput, RuleOutput};
use pulsemon_core::{MetricsConfig, StatsCollector, StatsWriter, Ticker};

use crate::engine::ProcEngine;

/// How often the main loop offers a sample to the collector. Sampling
/// itself is gated on the ticker, so this only bounds gate latency.
const POLL_CADENCE: Duration = Duration::from_millis(100);

/// Periodic metrics snapshot daemon.
#[derive(Parser)]
#[command(name = "pulsemond", about = "Periodic metrics snapshot daemon", version)]
struct Args {
    /// Sampling interval in seconds.
    #[arg(short, long, default_value = "10")]
    interval: u64,

    /// Append snapshots to this file, one JSON record per line.
    #[arg(short, long)]
    output_file: Option<PathBuf>,

    /// Emit snapshots through the structured rule output.
    /// Disable with --rule-output=false.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    rule_output: bool,

    /// Snapshot queue capacity. A full queue is fatal by policy.
    #[arg(long, default_value = "1000")]
    queue_capacity: usize,

    /// Report zero-valued counters instead of suppressing them.
    #[arg(long)]
    include_empty: bool,

    /// Convert memory-valued fields to readable units (KiB/MiB).
    #[arg(long)]
    readable_memory: bool,

    /// Counter categories to collect (comma-separated:
    /// state, resource, driver).
    #[arg(long, default_value = "state,resource,driver", value_parser = parse_categories)]
    categories: CategoryFlags,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Parses a comma-separated category list into a bitmask.
fn parse_categories(s: &str) -> Result<CategoryFlags, String> {
    let mut flags = CategoryFlags::empty();
    for part in s.split(',') {
        let part = part.trim();
        flags = flags
            | match part {
                "state" => CategoryFlags::STATE,
                "resource" => CategoryFlags::RESOURCE,
                "driver" => CategoryFlags::DRIVER,
                "" => continue,
                other => return Err(format!("unknown category '{}'", other)),
            };
    }
    if flags == CategoryFlags::empty() {
        return Err("at least one category is required".to_string());
    }
    Ok(flags)
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pulsemond={}", level).parse().unwrap())
        .add_directive(format!("pulsemon_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = MetricsConfig {
        enabled: true,
        interval: Duration::from_secs(args.interval),
        output_file: args.output_file.clone(),
        rule_output_enabled: args.rule_output,
        queue_capacity: args.queue_capacity,
        include_empty_values: args.include_empty,
        convert_memory_units: args.readable_memory,
        categories: args.categories,
    };

    info!("pulsemond {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, rule_output={}, file={}, capacity={}",
        args.interval,
        args.rule_output,
        args.output_file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string()),
        args.queue_capacity,
    );

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    if !config.has_sink() {
        error!("No sink enabled: pass --output-file and/or --rule-output=true");
        std::process::exit(1);
    }

    let ticker = Arc::new(Ticker::new());
    let timer = match ticker.start_timer(config.interval) {
        Ok(timer) => timer,
        Err(e) => {
            error!("Could not install periodic timer: {}", e);
            std::process::exit(1);
        }
    };

    let rule_output: Option<Arc<dyn RuleOutput>> = if config.rule_output_enabled {
        Some(Arc::new(LogRuleOutput))
    } else {
        None
    };

    let writer = match StatsWriter::spawn(Arc::new(config), Arc::clone(&ticker), rule_output) {
        Ok(writer) => writer,
        Err(e) => {
            error!("Could not start metrics writer: {}", e);
            std::process::exit(1);
        }
    };

    let proc_engine = ProcEngine::new(&args.proc_path);
    let mut collector = StatsCollector::new(Arc::clone(&writer));

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        error!("Failed to set Ctrl-C handler: {}", e);
    }

    info!("Starting sampling loop");

    let mut polls: u64 = 0;
    let mut last_logged_interval: u64 = 0;

    while running.load(Ordering::SeqCst) {
        polls += 1;
        collector.sample(&proc_engine, "procfs", polls, SystemTime::now());

        let completed = writer.total_samples();
        if completed > last_logged_interval {
            last_logged_interval = completed;
            debug!("Interval {} completed after {} polls", completed, polls);
            if completed.is_multiple_of(60) {
                info!("{} sampling intervals completed", completed);
            }
        }

        std::thread::sleep(POLL_CADENCE);
    }

    info!("Shutting down...");
    writer.stop();
    timer.cancel();
    info!(
        "Shutdown complete: {} intervals sampled over {} polls",
        writer.total_samples(),
        polls
    );
}
