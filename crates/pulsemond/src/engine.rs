//! Procfs-backed capture engine for self/host monitoring.
//!
//! Reads a handful of counters from `/proc` on each sample. Missing or
//! unreadable files simply drop the affected counters from the list;
//! the pipeline treats the engine as a read-only collaborator and never
//! requires completeness.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use pulsemon_core::engine::{
    AgentInfo, CaptureEngine, CategoryFlags, Counter, MachineInfo,
};

const NS_PER_SEC: u64 = 1_000_000_000;

pub struct ProcEngine {
    proc_path: PathBuf,
    version: String,
    /// Daemon start time, ns since epoch, fixed at construction.
    start_ts_epoch: u64,
}

impl ProcEngine {
    pub fn new(proc_path: impl Into<PathBuf>) -> Self {
        let start_ts_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            proc_path: proc_path.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_ts_epoch,
        }
    }

    fn read_trimmed(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.proc_path.join(rel))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Extracts a `key: value kB` line from `/proc/self/status`,
    /// returning the value in bytes.
    fn status_bytes(status: &str, key: &str) -> Option<u64> {
        status.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            Some(kb * 1024)
        })
    }

    /// Extracts a `key value` line from `/proc/stat`.
    fn stat_value(stat: &str, key: &str) -> Option<u64> {
        stat.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?;
            rest.trim().split_whitespace().next()?.parse().ok()
        })
    }

    fn count_dir_entries(&self, rel: &str) -> Option<u64> {
        std::fs::read_dir(self.proc_path.join(rel))
            .ok()
            .map(|entries| entries.count() as u64)
    }
}

impl CaptureEngine for ProcEngine {
    fn agent_info(&self) -> AgentInfo {
        AgentInfo {
            version: self.version.clone(),
            start_ts_epoch: self.start_ts_epoch,
            kernel_release: self
                .read_trimmed("sys/kernel/osrelease")
                .unwrap_or_default(),
        }
    }

    fn machine_info(&self) -> MachineInfo {
        let boot_ts_epoch = self
            .read_trimmed("stat")
            .and_then(|stat| Self::stat_value(&stat, "btime"))
            .map(|secs| secs * NS_PER_SEC)
            .unwrap_or(0);
        MachineInfo {
            hostname: self
                .read_trimmed("sys/kernel/hostname")
                .unwrap_or_default(),
            boot_ts_epoch,
            num_cpus: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(0),
        }
    }

    fn engine_name(&self) -> &str {
        "procfs"
    }

    fn runtime_counters(&self, categories: CategoryFlags) -> Vec<Counter> {
        let mut counters = Vec::new();

        if categories.contains(CategoryFlags::STATE) {
            if let Some(stat) = self.read_trimmed("stat") {
                if let Some(v) = Self::stat_value(&stat, "ctxt") {
                    counters.push(Counter::u64("n_ctx_switches", v));
                }
                if let Some(v) = Self::stat_value(&stat, "processes") {
                    counters.push(Counter::u64("n_forks", v));
                }
                if let Some(v) = Self::stat_value(&stat, "procs_running") {
                    counters.push(Counter::u64("n_procs_running", v));
                }
            }
            if let Some(status) = self.read_trimmed("self/status")
                && let Some(threads) = Self::stat_value(&status, "Threads:")
            {
                counters.push(Counter::u64("n_threads", threads));
            }
            if let Some(fds) = self.count_dir_entries("self/fd") {
                counters.push(Counter::u64("n_fds", fds));
            }
        }

        if categories.contains(CategoryFlags::RESOURCE)
            && let Some(status) = self.read_trimmed("self/status")
        {
            if let Some(rss) = Self::status_bytes(&status, "VmRSS") {
                counters.push(Counter::u64("memory_rss", rss));
            }
            if let Some(vms) = Self::status_bytes(&status, "VmSize") {
                counters.push(Counter::u64("memory_vms", vms));
            }
        }

        counters
    }

    fn driver_counters(&self, _categories: CategoryFlags) -> Vec<Counter> {
        // Procfs polling has no kernel capture component.
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn fake_proc(dir: &Path) {
        fs::create_dir_all(dir.join("sys/kernel")).unwrap();
        fs::create_dir_all(dir.join("self/fd")).unwrap();
        fs::write(dir.join("sys/kernel/hostname"), "testhost\n").unwrap();
        fs::write(dir.join("sys/kernel/osrelease"), "6.8.0-test\n").unwrap();
        fs::write(
            dir.join("stat"),
            "cpu 1 2 3 4\nctxt 123456\nbtime 1700000000\nprocesses 42\nprocs_running 3\n",
        )
        .unwrap();
        fs::write(
            dir.join("self/status"),
            "Name:\tpulsemond\nVmSize:\t  2048 kB\nVmRSS:\t  1024 kB\nThreads:\t5\n",
        )
        .unwrap();
        fs::write(dir.join("self/fd/0"), "").unwrap();
        fs::write(dir.join("self/fd/1"), "").unwrap();
    }

    fn counter_u64(counters: &[Counter], name: &str) -> Option<u64> {
        counters.iter().find(|c| c.name == name).and_then(|c| {
            if let pulsemon_core::engine::CounterValue::U64(v) = c.value {
                Some(v)
            } else {
                None
            }
        })
    }

    #[test]
    fn reads_counters_from_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        let engine = ProcEngine::new(dir.path());

        let counters = engine.runtime_counters(CategoryFlags::all());
        assert_eq!(counter_u64(&counters, "n_ctx_switches"), Some(123_456));
        assert_eq!(counter_u64(&counters, "n_forks"), Some(42));
        assert_eq!(counter_u64(&counters, "n_procs_running"), Some(3));
        assert_eq!(counter_u64(&counters, "n_threads"), Some(5));
        assert_eq!(counter_u64(&counters, "n_fds"), Some(2));
        assert_eq!(counter_u64(&counters, "memory_rss"), Some(1024 * 1024));
        assert_eq!(counter_u64(&counters, "memory_vms"), Some(2048 * 1024));

        assert!(engine.driver_counters(CategoryFlags::all()).is_empty());
    }

    #[test]
    fn identity_from_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        let engine = ProcEngine::new(dir.path());

        let machine = engine.machine_info();
        assert_eq!(machine.hostname, "testhost");
        assert_eq!(machine.boot_ts_epoch, 1_700_000_000 * NS_PER_SEC);

        let agent = engine.agent_info();
        assert_eq!(agent.kernel_release, "6.8.0-test");
        assert!(agent.start_ts_epoch > 0);
    }

    #[test]
    fn missing_proc_yields_empty_counters_not_errors() {
        let engine = ProcEngine::new("/definitely/not/proc");
        assert!(engine.runtime_counters(CategoryFlags::all()).is_empty());
        assert_eq!(engine.machine_info().boot_ts_epoch, 0);
    }

    #[test]
    fn categories_gate_counter_groups() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        let engine = ProcEngine::new(dir.path());

        let state_only = engine.runtime_counters(CategoryFlags::STATE);
        assert!(counter_u64(&state_only, "n_threads").is_some());
        assert!(counter_u64(&state_only, "memory_rss").is_none());

        let resource_only = engine.runtime_counters(CategoryFlags::RESOURCE);
        assert!(counter_u64(&resource_only, "memory_rss").is_some());
        assert!(counter_u64(&resource_only, "n_threads").is_none());
    }
}
