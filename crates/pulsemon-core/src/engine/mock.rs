//! Scriptable in-memory capture engine for testing the pipeline
//! without a real driver.

use crate::engine::{
    AgentInfo, CaptureEngine, CategoryFlags, Counter, CounterValue, MachineInfo,
};

/// In-memory capture engine.
///
/// Counter lists are set by the test and handed back verbatim, so tests
/// can script exact ordered sequences of raw values across samples.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    agent: AgentInfo,
    machine: MachineInfo,
    name: String,
    runtime: Vec<Counter>,
    driver: Vec<Counter>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            ..Self::default()
        }
    }

    /// A plausibly populated engine, for tests that do not care about
    /// exact values.
    pub fn typical() -> Self {
        let mut engine = Self::new();
        engine.agent = AgentInfo {
            version: "0.1.0".to_string(),
            start_ts_epoch: 1_700_000_000_000_000_000,
            kernel_release: "6.8.0-mock".to_string(),
        };
        engine.machine = MachineInfo {
            hostname: "mockhost".to_string(),
            boot_ts_epoch: 1_699_999_000_000_000_000,
            num_cpus: 8,
        };
        engine.runtime = vec![
            Counter::u64("n_threads", 42),
            Counter::u64("n_fds", 128),
            Counter::u64("memory_rss", 256 * 1024),
            Counter::u32("n_added_fds", 3),
            Counter::double("cpu_usage_perc", 1.5),
        ];
        engine.driver = vec![
            Counter::u64("n_evts", 1000),
            Counter::u64("n_drops", 10),
            Counter::u64("n_drops_buffer_total", 10),
        ];
        engine
    }

    pub fn with_agent(mut self, agent: AgentInfo) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_machine(mut self, machine: MachineInfo) -> Self {
        self.machine = machine;
        self
    }

    pub fn with_engine_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the runtime counter list returned by the next samples.
    pub fn set_runtime_counters(&mut self, counters: Vec<Counter>) {
        self.runtime = counters;
    }

    /// Replaces the driver counter list returned by the next samples.
    pub fn set_driver_counters(&mut self, counters: Vec<Counter>) {
        self.driver = counters;
    }

    /// Updates a single runtime counter in place, keeping list order.
    pub fn bump_runtime(&mut self, name: &str, value: CounterValue) {
        if let Some(c) = self.runtime.iter_mut().find(|c| c.name == name) {
            c.value = value;
        }
    }

    /// Updates a single driver counter in place, keeping list order.
    pub fn bump_driver(&mut self, name: &str, value: CounterValue) {
        if let Some(c) = self.driver.iter_mut().find(|c| c.name == name) {
            c.value = value;
        }
    }
}

impl CaptureEngine for MockEngine {
    fn agent_info(&self) -> AgentInfo {
        self.agent.clone()
    }

    fn machine_info(&self) -> MachineInfo {
        self.machine.clone()
    }

    fn engine_name(&self) -> &str {
        &self.name
    }

    fn runtime_counters(&self, categories: CategoryFlags) -> Vec<Counter> {
        if categories.contains(CategoryFlags::STATE)
            || categories.contains(CategoryFlags::RESOURCE)
        {
            self.runtime.clone()
        } else {
            Vec::new()
        }
    }

    fn driver_counters(&self, categories: CategoryFlags) -> Vec<Counter> {
        if categories.contains(CategoryFlags::DRIVER) {
            self.driver.clone()
        } else {
            Vec::new()
        }
    }
}
