pub mod classify;

use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;

/// Kernel process identifier. All per-process tables in a [`Snapshot`] are
/// keyed by this type; decoders parse the textual PIDs at the boundary so
/// the diff engine never compares stringly-typed keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

pub const INIT_PID: Pid = Pid(1);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

impl FromStr for Pid {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Pid)
    }
}

/// One row of the process table, from a `/proc/PID/status` style record.
/// Memory fields are kilobytes.
#[derive(Clone, Debug)]
pub struct Process {
    pub name: String,
    pub state: String,
    pub ppid: Pid,
    pub vm_size: u64,
    pub vm_rss: u64,
    pub threads: u32,
}

/// Per-process totals from a detailed smaps capture, kilobytes. More
/// accurate than the `/proc/PID/status` counters when present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmapsRecord {
    pub private_dirty: u64,
    pub swap: u64,
    pub pss: u64,
    pub rss: u64,
    pub size: u64,
}

impl SmapsRecord {
    /// Private dirty and swap summed. Pages that get swapped out move from
    /// one counter to the other without the process footprint changing, so
    /// the two are always diffed as a single figure.
    pub fn dirty_and_swap(&self) -> u64 {
        self.private_dirty + self.swap
    }
}

/// System memory counters in kilobytes. `free` here already includes
/// buffers, page cache and reclaimable slab.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemCounters {
    pub ram_total: u64,
    pub ram_free: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

impl MemCounters {
    pub fn ram_used(&self) -> u64 {
        self.ram_total.saturating_sub(self.ram_free)
    }

    pub fn swap_used(&self) -> u64 {
        self.swap_total.saturating_sub(self.swap_free)
    }

    /// RAM and swap combined, the basis for the usage-overview graph and
    /// the OOM emphasis threshold.
    pub fn total(&self) -> u64 {
        self.ram_total + self.swap_total
    }

    pub fn free_total(&self) -> u64 {
        self.ram_free + self.swap_free
    }

    pub fn used_total(&self) -> u64 {
        self.ram_used() + self.swap_used()
    }
}

/// Platform low-memory limits as percentages of total memory. All zero
/// means the platform does not enforce them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LowmemLimits {
    pub low: u64,
    pub high: u64,
    pub deny: u64,
}

impl LowmemLimits {
    pub fn in_effect(&self) -> bool {
        self.low + self.high + self.deny > 0
    }
}

/// Cumulative CPU tick breakdown from the kernel `stat` aggregate line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuTicks {
    pub fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq
    }

    /// Ticks spent doing work, i.e. everything except idle and iowait.
    pub fn used(&self) -> u64 {
        self.user + self.nice + self.system + self.irq + self.softirq
    }
}

/// Cumulative kernel event counters. Optional fields depend on the kernel
/// version that produced the capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelStats {
    pub cpu: CpuTicks,
    pub interrupts: u64,
    pub context_switches: u64,
    pub page_faults: Option<u64>,
    pub swap_in: Option<u64>,
    pub swap_out: Option<u64>,
}

/// Cumulative per-process CPU ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcTicks {
    pub utime: u64,
    pub stime: u64,
}

impl ProcTicks {
    pub fn total(&self) -> u64 {
        self.utime + self.stime
    }
}

/// Everything captured for one test round, normalized by the decoders.
/// Immutable once loaded; the diff engine only ever reads these.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub release: String,
    pub datetime: String,
    /// Seconds since boot at capture time, when the bundle includes it.
    /// A regression between rounds means the device rebooted.
    pub uptime: Option<f64>,
    pub mem: MemCounters,
    pub limits: LowmemLimits,
    /// System-wide unused file descriptors.
    pub fd_free: u64,
    pub processes: BTreeMap<Pid, Process>,
    /// Entries too sparse for a full process record: kernel threads and
    /// zombies, PID to name only.
    pub kernel_threads: BTreeMap<Pid, String>,
    /// Resolved command basename per PID. May differ from `Process::name`
    /// when a launcher rewrites the name it was started under.
    pub commands: BTreeMap<Pid, String>,
    pub fd_counts: BTreeMap<Pid, u64>,
    pub smaps: Option<BTreeMap<Pid, SmapsRecord>>,
    /// Total private dirty pages in executable file mappings; nonzero
    /// means incorrectly built shared libraries.
    pub private_code: Option<u64>,
    /// Used kilobytes per mountpoint.
    pub mounts: BTreeMap<String, u64>,
    /// X server resource memory per client, kilobytes.
    pub xclient_mem: BTreeMap<String, u64>,
    /// X server resource counts per client.
    pub xclient_count: BTreeMap<String, u64>,
    /// Shared memory segment counts, keyed "normal" / "orphan".
    pub shm: BTreeMap<String, u64>,
    pub kernel: Option<KernelStats>,
    pub proc_ticks: Option<BTreeMap<Pid, ProcTicks>>,
    /// Log lines per error category, as produced by the log classifier.
    /// Lists are cumulative across rounds because the underlying log only
    /// grows; see `diff::errors` for how violations are handled.
    pub errors: Option<BTreeMap<String, Vec<String>>>,
    /// Directory this round was loaded from, used for report links only.
    pub basedir: PathBuf,
}

impl Snapshot {
    /// An empty snapshot with the given identity, for building test and
    /// synthetic rounds field by field.
    pub fn empty(release: &str, datetime: &str) -> Self {
        Snapshot {
            release: release.to_string(),
            datetime: datetime.to_string(),
            uptime: None,
            mem: MemCounters::default(),
            limits: LowmemLimits::default(),
            fd_free: 0,
            processes: BTreeMap::new(),
            kernel_threads: BTreeMap::new(),
            commands: BTreeMap::new(),
            fd_counts: BTreeMap::new(),
            smaps: None,
            private_code: None,
            mounts: BTreeMap::new(),
            xclient_mem: BTreeMap::new(),
            xclient_count: BTreeMap::new(),
            shm: BTreeMap::new(),
            kernel: None,
            proc_ticks: None,
            errors: None,
            basedir: PathBuf::new(),
        }
    }

    /// PID to display-name map over the full process table, preferring the
    /// resolved command basename where the FD table knows the PID.
    pub fn named_pids(&self) -> BTreeMap<Pid, String> {
        self.processes
            .iter()
            .map(|(&pid, process)| {
                let name = self
                    .commands
                    .get(&pid)
                    .cloned()
                    .unwrap_or_else(|| process.name.clone());
                (pid, name)
            })
            .collect()
    }
}
