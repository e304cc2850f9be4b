//! Capture-engine collaborator interface.
//!
//! The engine that observes events (kernel driver, plugin, procfs
//! poller, ...) is external to this pipeline. Collectors only consume a
//! read-only view of it: identity metadata plus two ordered lists of
//! tagged numeric counters.

pub mod mock;

/// Source label of the primary syscall-capture source. Driver-side
/// counters are collected only for this source.
pub const SYSCALL_SOURCE: &str = "syscall";

/// A tagged raw counter value as supplied by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CounterValue {
    U64(u64),
    U32(u32),
    Double(f64),
}

/// One named raw counter.
#[derive(Debug, Clone)]
pub struct Counter {
    pub name: String,
    pub value: CounterValue,
}

impl Counter {
    pub fn u64(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value: CounterValue::U64(value),
        }
    }

    pub fn u32(name: impl Into<String>, value: u32) -> Self {
        Self {
            name: name.into(),
            value: CounterValue::U32(value),
        }
    }

    pub fn double(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: CounterValue::Double(value),
        }
    }
}

/// Identity of the monitoring agent process.
#[derive(Debug, Clone, Default)]
pub struct AgentInfo {
    pub version: String,
    /// Agent start time, nanoseconds since epoch.
    pub start_ts_epoch: u64,
    pub kernel_release: String,
}

/// Identity of the monitored host.
#[derive(Debug, Clone, Default)]
pub struct MachineInfo {
    pub hostname: String,
    /// Host boot time, nanoseconds since epoch.
    pub boot_ts_epoch: u64,
    pub num_cpus: u32,
}

/// Bitmask selecting which counter categories the engine should
/// include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryFlags(u32);

impl CategoryFlags {
    /// Engine/runtime state counters (threads, fds, caches).
    pub const STATE: CategoryFlags = CategoryFlags(1 << 0);
    /// Resource utilization counters (cpu, memory).
    pub const RESOURCE: CategoryFlags = CategoryFlags(1 << 1);
    /// Kernel-side/driver counters.
    pub const DRIVER: CategoryFlags = CategoryFlags(1 << 2);

    pub const fn empty() -> Self {
        CategoryFlags(0)
    }

    pub const fn all() -> Self {
        CategoryFlags(Self::STATE.0 | Self::RESOURCE.0 | Self::DRIVER.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        CategoryFlags(bits)
    }

    pub const fn contains(self, other: CategoryFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CategoryFlags {
    type Output = CategoryFlags;

    fn bitor(self, rhs: CategoryFlags) -> CategoryFlags {
        CategoryFlags(self.0 | rhs.0)
    }
}

impl Default for CategoryFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Read-only view of the event-capture engine.
///
/// `runtime_counters` and `driver_counters` return fresh ordered
/// snapshots of the raw counters; the pipeline applies naming,
/// suppression, and conversion on top, never mutating the engine.
pub trait CaptureEngine {
    fn agent_info(&self) -> AgentInfo;

    fn machine_info(&self) -> MachineInfo;

    /// Name of the currently active capture engine (e.g. "bpf",
    /// "kmod", "procfs").
    fn engine_name(&self) -> &str;

    /// Userspace/runtime counters, filtered by `categories`.
    fn runtime_counters(&self, categories: CategoryFlags) -> Vec<Counter>;

    /// Kernel-side/driver counters, filtered by `categories`. Engines
    /// without a kernel component return an empty list.
    fn driver_counters(&self, categories: CategoryFlags) -> Vec<Counter>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_flags_contains_and_union() {
        let flags = CategoryFlags::STATE | CategoryFlags::DRIVER;
        assert!(flags.contains(CategoryFlags::STATE));
        assert!(flags.contains(CategoryFlags::DRIVER));
        assert!(!flags.contains(CategoryFlags::RESOURCE));
        assert!(CategoryFlags::all().contains(flags));
        assert!(!CategoryFlags::empty().contains(CategoryFlags::STATE));
    }

    #[test]
    fn category_flags_bits_round_trip() {
        let flags = CategoryFlags::RESOURCE | CategoryFlags::DRIVER;
        assert_eq!(CategoryFlags::from_bits(flags.bits()), flags);
    }
}
