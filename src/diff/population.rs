use std::collections::BTreeMap;

use crate::snapshot::Pid;

/// One process that entered or left the table between two rounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopulationEntry {
    pub name: String,
    pub pid: Pid,
    /// Paired with a same-named entry on the other side of the diff: a
    /// supervisor restarting a crashed service, not genuine churn. Only
    /// the display emphasis depends on this, never the counts.
    pub respawn: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PopulationDiff {
    pub exited: Vec<PopulationEntry>,
    pub started: Vec<PopulationEntry>,
    pub net_change: i64,
    /// Population size in the later round.
    pub total: usize,
}

impl PopulationDiff {
    pub fn is_empty(&self) -> bool {
        self.exited.is_empty() && self.started.is_empty()
    }
}

/// Splits two PID populations into exited and started entries and pairs up
/// same-named exits and starts as respawns.
///
/// Pairing is greedy over the exited list in (name, pid) order, consuming
/// each started entry at most once. The order is deterministic but not a
/// contract; when several same-named processes churn in one window any
/// pairing is equally plausible.
pub fn diff_population(
    pids1: &BTreeMap<Pid, String>,
    pids2: &BTreeMap<Pid, String>,
) -> PopulationDiff {
    let mut exited: Vec<PopulationEntry> = pids1
        .iter()
        .filter(|(pid, _)| !pids2.contains_key(pid))
        .map(|(&pid, name)| PopulationEntry {
            name: name.clone(),
            pid,
            respawn: false,
        })
        .collect();
    let mut started: Vec<PopulationEntry> = pids2
        .iter()
        .filter(|(pid, _)| !pids1.contains_key(pid))
        .map(|(&pid, name)| PopulationEntry {
            name: name.clone(),
            pid,
            respawn: false,
        })
        .collect();

    let by_name_then_pid =
        |a: &PopulationEntry, b: &PopulationEntry| (&a.name, a.pid).cmp(&(&b.name, b.pid));
    exited.sort_by(by_name_then_pid);
    started.sort_by(by_name_then_pid);

    let mut consumed = vec![false; started.len()];
    for gone in &mut exited {
        let candidate =
            (0..started.len()).find(|&idx| !consumed[idx] && started[idx].name == gone.name);
        if let Some(idx) = candidate {
            consumed[idx] = true;
            started[idx].respawn = true;
            gone.respawn = true;
        }
    }

    PopulationDiff {
        exited,
        started,
        net_change: pids2.len() as i64 - pids1.len() as i64,
        total: pids2.len(),
    }
}
