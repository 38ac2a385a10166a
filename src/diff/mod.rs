pub mod errors;
pub mod kernel;
pub mod population;
pub mod values;

use crate::config::ThresholdsConfig;
use crate::snapshot::Snapshot;

use errors::ErrorDiff;
use kernel::{CpuUsageDiff, TickComparison};
use population::PopulationDiff;

/// One changed metric between two rounds. `change_from_initial` is filled
/// only when the comparison was given a third, initial-state reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffRecord {
    pub change: i64,
    pub change_from_initial: Option<i64>,
    pub total: i64,
    pub label: String,
}

/// Display order: biggest growth first, label as deterministic tie-break.
pub fn sort_for_display(diffs: &mut [DiffRecord]) {
    diffs.sort_by(|a, b| b.change.cmp(&a.change).then_with(|| a.label.cmp(&b.label)));
}

/// Everything the diff engine derived from one pair of rounds. Sections
/// whose source data was missing in either round are `None`; the report
/// renders those as omitted rather than empty.
#[derive(Clone, Debug)]
pub struct RoundDiff {
    /// Releases of the compared rounds when they disagree.
    pub release_mismatch: Option<(String, String)>,
    /// Uptime went backwards: the device rebooted between the rounds.
    pub reboot_suspected: bool,
    /// Change in system free memory (RAM + swap), kB.
    pub free_change: i64,
    pub fd_free_change: i64,
    pub fd_free: u64,
    pub private_code_change: Option<i64>,
    pub mounts: Vec<DiffRecord>,
    /// Per-process private dirty + swap changes from the detailed memory
    /// scanner; `None` when either round lacks the capture.
    pub proc_memory: Option<Vec<DiffRecord>>,
    pub xclient_mem: Vec<DiffRecord>,
    pub xclient_count: Vec<DiffRecord>,
    pub shm: Vec<DiffRecord>,
    pub fd_counts: Vec<DiffRecord>,
    pub thread_counts: Vec<DiffRecord>,
    pub processes: PopulationDiff,
    pub kernel_threads: PopulationDiff,
    pub kernel: Option<TickComparison>,
    pub cpu_usage: Option<CpuUsageDiff>,
    pub errors: ErrorDiff,
}

/// Compares two rounds. `initial` supplies the change-from-initial
/// reference column; pass `None` when round1 is itself the initial state.
pub fn compare_rounds(
    initial: Option<&Snapshot>,
    round1: &Snapshot,
    round2: &Snapshot,
    thresholds: &ThresholdsConfig,
) -> RoundDiff {
    let release_mismatch = if round1.release != round2.release {
        tracing::warn!(
            "release '{}' does not match previous round release '{}'",
            round2.release,
            round1.release
        );
        Some((round1.release.clone(), round2.release.clone()))
    } else {
        None
    };

    let reboot_suspected = match (round1.uptime, round2.uptime) {
        (Some(before), Some(after)) => after < before,
        _ => false,
    };

    let free_change = round2.mem.free_total() as i64 - round1.mem.free_total() as i64;
    let fd_free_change = round2.fd_free as i64 - round1.fd_free as i64;
    let private_code_change = match (round1.private_code, round2.private_code) {
        (Some(before), Some(after)) => Some(after as i64 - before as i64),
        _ => None,
    };

    let proc_memory = match (&round1.smaps, &round2.smaps) {
        (Some(smaps1), Some(smaps2)) => {
            let initial_mem = initial
                .and_then(|snapshot| snapshot.smaps.as_ref())
                .map(values::combine_dirty_and_swap);
            Some(values::diff_pid_values(
                &round2.commands,
                &round2.processes,
                initial_mem.as_ref(),
                &values::combine_dirty_and_swap(smaps1),
                &values::combine_dirty_and_swap(smaps2),
                None,
            ))
        }
        _ => None,
    };

    let fd_counts = values::diff_pid_values(
        &round2.commands,
        &round2.processes,
        initial.map(|snapshot| &snapshot.fd_counts),
        &round1.fd_counts,
        &round2.fd_counts,
        Some(&round2.kernel_threads),
    );

    let thread_counts = values::diff_thread_counts(
        &round2.commands,
        &round1.processes,
        &round2.processes,
        initial.map(|snapshot| &snapshot.processes),
    );

    let kernel = match (&round1.kernel, &round2.kernel) {
        (Some(kernel1), Some(kernel2)) => Some(kernel::diff_kernel_rates(
            kernel1,
            kernel2,
            thresholds.ticks_per_second,
        )),
        _ => None,
    };

    let cpu_usage = match (
        &round1.kernel,
        &round2.kernel,
        &round1.proc_ticks,
        &round2.proc_ticks,
    ) {
        (Some(kernel1), Some(kernel2), Some(ticks1), Some(ticks2)) => {
            let mut names = round2.named_pids();
            for (&pid, name) in &round2.kernel_threads {
                names.entry(pid).or_insert_with(|| format!("[{name}]"));
            }
            kernel::diff_process_ticks(
                &names,
                ticks1,
                ticks2,
                kernel1,
                kernel2,
                thresholds.cpu_show_share,
            )
        }
        _ => None,
    };

    RoundDiff {
        release_mismatch,
        reboot_suspected,
        free_change,
        fd_free_change,
        fd_free: round2.fd_free,
        private_code_change,
        mounts: values::diff_named_values(
            initial.map(|snapshot| &snapshot.mounts),
            &round1.mounts,
            &round2.mounts,
        ),
        proc_memory,
        xclient_mem: values::diff_named_values(
            initial.map(|snapshot| &snapshot.xclient_mem),
            &round1.xclient_mem,
            &round2.xclient_mem,
        ),
        xclient_count: values::diff_named_values(
            initial.map(|snapshot| &snapshot.xclient_count),
            &round1.xclient_count,
            &round2.xclient_count,
        ),
        shm: values::diff_named_values(
            initial.map(|snapshot| &snapshot.shm),
            &round1.shm,
            &round2.shm,
        ),
        fd_counts,
        thread_counts,
        processes: population::diff_population(&round1.named_pids(), &round2.named_pids()),
        kernel_threads: population::diff_population(&round1.kernel_threads, &round2.kernel_threads),
        kernel,
        cpu_usage,
        errors: errors::diff_error_categories(round1.errors.as_ref(), round2.errors.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{KernelStats, Pid, Process};

    fn process(name: &str, ppid: u32, vm_size: u64, threads: u32) -> Process {
        Process {
            name: name.to_string(),
            state: "S".to_string(),
            ppid: Pid(ppid),
            vm_size,
            vm_rss: vm_size / 2,
            threads,
        }
    }

    fn round(release: &str, free: u64) -> Snapshot {
        let mut snapshot = Snapshot::empty(release, "date 2026-01-01");
        snapshot.mem.ram_total = 256 * 1024;
        snapshot.mem.ram_free = free;
        snapshot
    }

    #[test]
    fn release_mismatch_is_annotated_not_fatal() {
        let round1 = round("SW 1.0", 1000);
        let mut round2 = round("SW 2.0", 900);
        round2.mounts.insert("/".into(), 10);
        let diff = compare_rounds(None, &round1, &round2, &ThresholdsConfig::default());
        assert_eq!(
            diff.release_mismatch,
            Some(("SW 1.0".into(), "SW 2.0".into()))
        );
        // everything else still computed
        assert_eq!(diff.free_change, -100);
    }

    #[test]
    fn uptime_regression_flags_reboot() {
        let mut round1 = round("SW 1.0", 1000);
        let mut round2 = round("SW 1.0", 1000);
        round1.uptime = Some(5000.0);
        round2.uptime = Some(120.0);
        let diff = compare_rounds(None, &round1, &round2, &ThresholdsConfig::default());
        assert!(diff.reboot_suspected);
    }

    #[test]
    fn missing_optional_sections_are_none() {
        let round1 = round("SW 1.0", 1000);
        let round2 = round("SW 1.0", 1000);
        let diff = compare_rounds(None, &round1, &round2, &ThresholdsConfig::default());
        assert!(diff.proc_memory.is_none());
        assert!(diff.kernel.is_none());
        assert!(diff.cpu_usage.is_none());
        assert!(diff.private_code_change.is_none());
    }

    #[test]
    fn reboot_still_reports_population_and_memory() {
        // Scenario D: tick counters went backwards, but population and
        // memory diffs for the same pair still compute.
        let mut round1 = round("SW 1.0", 2000);
        let mut round2 = round("SW 1.0", 1500);
        round1.kernel = Some(KernelStats {
            cpu: crate::snapshot::CpuTicks {
                user: 1000,
                ..Default::default()
            },
            ..Default::default()
        });
        round2.kernel = Some(KernelStats {
            cpu: crate::snapshot::CpuTicks {
                user: 800,
                ..Default::default()
            },
            ..Default::default()
        });
        round1.processes.insert(Pid(5), process("app", 1, 100, 1));
        round1.commands.insert(Pid(5), "app".into());
        round2.processes.insert(Pid(9), process("app", 1, 100, 1));
        round2.commands.insert(Pid(9), "app".into());

        let diff = compare_rounds(None, &round1, &round2, &ThresholdsConfig::default());
        assert_eq!(diff.kernel, Some(TickComparison::RebootDetected));
        assert_eq!(diff.free_change, -500);
        assert_eq!(diff.processes.exited.len(), 1);
        assert_eq!(diff.processes.started.len(), 1);
    }
}
