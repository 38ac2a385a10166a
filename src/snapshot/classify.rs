use std::collections::BTreeMap;

use super::{INIT_PID, Pid, Process};

/// Returns false when the PID looks like a secondary thread of an already
/// tracked process rather than an independent process.
///
/// Process tables enumerate kernel-visible tasks, so every secondary thread
/// of a multi-threaded process shows up exactly like a process. Without
/// this filter each resource table would count those threads as separate
/// leaking processes. A PID is taken for a thread only when its parent is
/// itself a tracked command with the same resolved name and the exact same
/// virtual size; children of init are always independent.
pub fn is_main_thread(
    pid: Pid,
    commands: &BTreeMap<Pid, String>,
    processes: &BTreeMap<Pid, Process>,
) -> bool {
    let Some(process) = processes.get(&pid) else {
        return true;
    };
    let Some(name) = commands.get(&pid) else {
        return true;
    };
    let ppid = process.ppid;
    if ppid == INIT_PID {
        return true;
    }
    let same_name = commands.get(&ppid).is_some_and(|parent| parent == name);
    let same_size = processes
        .get(&ppid)
        .is_some_and(|parent| parent.vm_size == process.vm_size);
    !(same_name && same_size)
}
