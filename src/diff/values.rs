use std::collections::BTreeMap;

use crate::snapshot::classify::is_main_thread;
use crate::snapshot::{Pid, Process, SmapsRecord};

use super::{DiffRecord, sort_for_display};

/// Differences between two `name -> value` tables, for per-mount usage, X
/// client resources, shared memory segment counts and the like.
///
/// Keys absent from round1 are skipped: there is no delta to compute for a
/// table that has no population-diff path, and every named-value table is
/// treated the same way.
pub fn diff_named_values(
    initial: Option<&BTreeMap<String, u64>>,
    round1: &BTreeMap<String, u64>,
    round2: &BTreeMap<String, u64>,
) -> Vec<DiffRecord> {
    let mut diffs = Vec::new();
    for (name, &value2) in round2 {
        let Some(&value1) = round1.get(name) else {
            continue;
        };
        if value1 == value2 {
            continue;
        }
        let change_from_initial = initial.map(|table| {
            value2 as i64 - table.get(name).copied().unwrap_or(value2) as i64
        });
        diffs.push(DiffRecord {
            change: value2 as i64 - value1 as i64,
            change_from_initial,
            total: value2 as i64,
            label: name.clone(),
        });
    }
    sort_for_display(&mut diffs);
    diffs
}

/// Differences between two `Pid -> value` tables, with thread suppression.
///
/// A PID missing from round1 is skipped (population changes are reported
/// separately); a PID that classifies as a secondary thread is dropped.
/// When `kernel_threads2` is given, PIDs found there instead of in the
/// process/command tables are kept and labeled in brackets; those entries
/// have no thread-vs-process ambiguity to filter. A PID in one table but
/// not its pair is inconsistent capture data: logged and skipped, never a
/// hard failure.
pub fn diff_pid_values(
    commands2: &BTreeMap<Pid, String>,
    processes2: &BTreeMap<Pid, Process>,
    initial: Option<&BTreeMap<Pid, u64>>,
    values1: &BTreeMap<Pid, u64>,
    values2: &BTreeMap<Pid, u64>,
    kernel_threads2: Option<&BTreeMap<Pid, String>>,
) -> Vec<DiffRecord> {
    let mut diffs = Vec::new();
    for (&pid, &value2) in values2 {
        let Some(&value1) = values1.get(&pid) else {
            continue;
        };
        if value1 == value2 {
            continue;
        }
        let label = match commands2.get(&pid) {
            Some(name) if processes2.contains_key(&pid) => {
                if !is_main_thread(pid, commands2, processes2) {
                    continue;
                }
                format!("{name}[{pid}]")
            }
            _ => match kernel_threads2.and_then(|kthreads| kthreads.get(&pid)) {
                Some(name) => format!("[{name}][{pid}]"),
                None => {
                    tracing::warn!("PID {pid} missing from command or process table, skipping");
                    continue;
                }
            },
        };
        let change_from_initial = initial.map(|table| {
            value2 as i64 - table.get(&pid).copied().unwrap_or(value2) as i64
        });
        diffs.push(DiffRecord {
            change: value2 as i64 - value1 as i64,
            change_from_initial,
            total: value2 as i64,
            label,
        });
    }
    sort_for_display(&mut diffs);
    diffs
}

/// Collapses a detailed memory capture into one figure per PID. Swapped-out
/// pages move from the dirty counter to the swap counter without any real
/// footprint change, so diffing the counters separately would report a
/// spurious -N dirty / +N swap pair for every swap event.
pub fn combine_dirty_and_swap(smaps: &BTreeMap<Pid, SmapsRecord>) -> BTreeMap<Pid, u64> {
    smaps
        .iter()
        .map(|(&pid, record)| (pid, record.dirty_and_swap()))
        .collect()
}

/// Per-process thread count changes, for PIDs present in both rounds.
pub fn diff_thread_counts(
    commands2: &BTreeMap<Pid, String>,
    processes1: &BTreeMap<Pid, Process>,
    processes2: &BTreeMap<Pid, Process>,
    initial: Option<&BTreeMap<Pid, Process>>,
) -> Vec<DiffRecord> {
    let mut diffs = Vec::new();
    for (&pid, name) in commands2 {
        let (Some(before), Some(after)) = (processes1.get(&pid), processes2.get(&pid)) else {
            continue;
        };
        if before.threads == after.threads {
            continue;
        }
        let change_from_initial = initial
            .and_then(|table| table.get(&pid))
            .map(|process| after.threads as i64 - process.threads as i64);
        diffs.push(DiffRecord {
            change: after.threads as i64 - before.threads as i64,
            change_from_initial,
            total: after.threads as i64,
            label: format!("{name}[{pid}]"),
        });
    }
    sort_for_display(&mut diffs);
    diffs
}
