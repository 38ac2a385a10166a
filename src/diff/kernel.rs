use std::collections::BTreeMap;

use crate::snapshot::{KernelStats, Pid, ProcTicks};

/// Outcome of comparing cumulative kernel counters between two rounds.
/// The two skip cases must stay distinct: counters going backwards means
/// the device rebooted, zero elapsed ticks means the same capture was fed
/// in twice.
#[derive(Clone, Debug, PartialEq)]
pub enum TickComparison {
    Rates(KernelRates),
    RebootDetected,
    NoElapsedTime,
}

/// Kernel event rates over one comparison window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KernelRates {
    pub elapsed_secs: f64,
    pub interrupts_per_sec: f64,
    pub context_switches_per_sec: f64,
    pub page_faults_per_sec: Option<f64>,
    pub swap_in_per_sec: Option<f64>,
    pub swap_out_per_sec: Option<f64>,
}

/// Converts two rounds' cumulative counters to per-second rates, using the
/// elapsed CPU ticks as the clock. `ticks_per_second` is the USER_HZ of
/// the measured device.
pub fn diff_kernel_rates(
    kernel1: &KernelStats,
    kernel2: &KernelStats,
    ticks_per_second: u64,
) -> TickComparison {
    let tickdiff = kernel2.cpu.total() as i64 - kernel1.cpu.total() as i64;
    if tickdiff < 0 {
        tracing::warn!("CPU tick counters went backwards, reboot between rounds");
        return TickComparison::RebootDetected;
    }
    if tickdiff == 0 {
        tracing::warn!("no CPU ticks elapsed between rounds, duplicate snapshot?");
        return TickComparison::NoElapsedTime;
    }
    let elapsed_secs = tickdiff as f64 / ticks_per_second.max(1) as f64;
    let rate = |after: u64, before: u64| (after as f64 - before as f64) / elapsed_secs;
    let optional_rate = |after: Option<u64>, before: Option<u64>| match (before, after) {
        (Some(before), Some(after)) => Some(rate(after, before)),
        _ => None,
    };
    TickComparison::Rates(KernelRates {
        elapsed_secs,
        interrupts_per_sec: rate(kernel2.interrupts, kernel1.interrupts),
        context_switches_per_sec: rate(kernel2.context_switches, kernel1.context_switches),
        page_faults_per_sec: optional_rate(kernel2.page_faults, kernel1.page_faults),
        swap_in_per_sec: optional_rate(kernel2.swap_in, kernel1.swap_in),
        swap_out_per_sec: optional_rate(kernel2.swap_out, kernel1.swap_out),
    })
}

/// One process that used a visible share of the CPU in the window.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuEntry {
    pub label: String,
    pub ticks: i64,
    /// Fraction of the window's total elapsed ticks.
    pub share: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CpuUsageDiff {
    /// Processes above the significance threshold, biggest user first.
    pub entries: Vec<CpuEntry>,
    /// Ticks spent by processes that started and exited entirely inside
    /// the window, so no PID accounts for them. Can go slightly negative
    /// from accounting noise; reported as-is since clamping would hide
    /// the measurement imprecision.
    pub unaccounted_ticks: i64,
    /// Sum of ticks of processes below the threshold.
    pub filtered_ticks: i64,
    pub filtered_count: usize,
    /// Elapsed ticks in the window, the basis for every share.
    pub total_ticks: i64,
}

/// Per-process CPU usage over one window. Returns `None` when no ticks
/// elapsed or counters regressed; callers distinguish those cases through
/// [`diff_kernel_rates`].
pub fn diff_process_ticks(
    names2: &BTreeMap<Pid, String>,
    ticks1: &BTreeMap<Pid, ProcTicks>,
    ticks2: &BTreeMap<Pid, ProcTicks>,
    kernel1: &KernelStats,
    kernel2: &KernelStats,
    show_share: f64,
) -> Option<CpuUsageDiff> {
    let total_ticks = kernel2.cpu.total() as i64 - kernel1.cpu.total() as i64;
    if total_ticks <= 0 {
        return None;
    }

    let mut entries = Vec::new();
    let mut tracked_ticks = 0i64;
    for (&pid, after) in ticks2 {
        let Some(before) = ticks1.get(&pid) else {
            continue;
        };
        let used = after.total() as i64 - before.total() as i64;
        tracked_ticks += used;
        if used == 0 {
            continue;
        }
        let label = match names2.get(&pid) {
            Some(name) => format!("{name}[{pid}]"),
            None => format!("[{pid}]"),
        };
        entries.push(CpuEntry {
            label,
            ticks: used,
            share: used as f64 / total_ticks as f64,
        });
    }

    let used_ticks = kernel2.cpu.used() as i64 - kernel1.cpu.used() as i64;
    let unaccounted_ticks = used_ticks - tracked_ticks;

    let (shown, filtered): (Vec<CpuEntry>, Vec<CpuEntry>) = entries
        .into_iter()
        .partition(|entry| entry.share >= show_share);
    let mut entries = shown;
    entries.sort_by(|a, b| b.ticks.cmp(&a.ticks).then_with(|| a.label.cmp(&b.label)));

    Some(CpuUsageDiff {
        entries,
        unaccounted_ticks,
        filtered_ticks: filtered.iter().map(|entry| entry.ticks).sum(),
        filtered_count: filtered.len(),
        total_ticks,
    })
}
