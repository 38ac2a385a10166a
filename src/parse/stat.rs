use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::snapshot::{CpuTicks, KernelStats, Pid, ProcTicks};

use super::ParseError;

/// Parses a `/proc/stat` copy: the aggregate cpu line plus the cumulative
/// interrupt and context switch counters. Older 2.4-era captures also
/// carry a `swap in out` line.
pub fn parse_stat(path: &Path) -> Result<KernelStats, ParseError> {
    let contents = fs::read_to_string(path).map_err(|err| ParseError::io(path, err))?;
    parse_stat_str(path, &contents)
}

pub(crate) fn parse_stat_str(path: &Path, contents: &str) -> Result<KernelStats, ParseError> {
    let mut stats = KernelStats::default();
    let mut saw_cpu = false;
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };
        let mut numbers = fields.map_while(|field| field.parse::<u64>().ok());
        match name {
            // "cpu" is the aggregate; "cpu0".. are per core
            "cpu" => {
                let mut next = || numbers.next().unwrap_or(0);
                stats.cpu = CpuTicks {
                    user: next(),
                    nice: next(),
                    system: next(),
                    idle: next(),
                    iowait: next(),
                    irq: next(),
                    softirq: next(),
                };
                saw_cpu = true;
            }
            "intr" => stats.interrupts = numbers.next().unwrap_or(0),
            "ctxt" => stats.context_switches = numbers.next().unwrap_or(0),
            "swap" => {
                stats.swap_in = numbers.next();
                stats.swap_out = numbers.next();
            }
            _ => {}
        }
    }
    if !saw_cpu {
        return Err(ParseError::format(path, 1, "no aggregate cpu line"));
    }
    Ok(stats)
}

/// Counters from an optional `/proc/vmstat` copy that refine the kernel
/// stats on 2.6 kernels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VmCounters {
    pub page_faults: Option<u64>,
    pub swap_in: Option<u64>,
    pub swap_out: Option<u64>,
}

pub fn parse_vmstat(path: &Path) -> Result<VmCounters, ParseError> {
    let contents = fs::read_to_string(path).map_err(|err| ParseError::io(path, err))?;
    let mut counters = VmCounters::default();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let value = value.parse().ok();
        match name {
            "pgfault" => counters.page_faults = value,
            "pswpin" => counters.swap_in = value,
            "pswpout" => counters.swap_out = value,
            _ => {}
        }
    }
    Ok(counters)
}

/// Seconds since boot, from a `/proc/uptime` copy.
pub fn parse_uptime(path: &Path) -> Result<f64, ParseError> {
    let contents = fs::read_to_string(path).map_err(|err| ParseError::io(path, err))?;
    contents
        .split_whitespace()
        .next()
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| ParseError::format(path, 1, "no uptime value"))
}

/// Cumulative per-process CPU ticks, from the collector's `pid,utime,stime`
/// table.
pub fn parse_pidstat(path: &Path) -> Result<BTreeMap<Pid, ProcTicks>, ParseError> {
    let contents = fs::read_to_string(path).map_err(|err| ParseError::io(path, err))?;
    let mut ticks = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let parsed = match fields[..] {
            [pid, utime, stime] => pid
                .trim()
                .parse::<Pid>()
                .ok()
                .zip(utime.trim().parse::<u64>().ok())
                .zip(stime.trim().parse::<u64>().ok()),
            _ => None,
        };
        match parsed {
            Some(((pid, utime), stime)) => {
                ticks.insert(pid, ProcTicks { utime, stime });
            }
            // tolerate a header row, warn on anything else
            None if line.starts_with(|c: char| !c.is_ascii_digit()) => {}
            None => tracing::warn!("{}: malformed tick row '{line}'", path.display()),
        }
    }
    Ok(ticks)
}

/// Shared memory segment counts from a `/proc/sysvipc/shm` copy. Segments
/// nobody is attached to are leaks waiting to be noticed, so they get
/// their own bucket.
pub fn parse_shm(path: &Path) -> Result<BTreeMap<String, u64>, ParseError> {
    let contents = fs::read_to_string(path).map_err(|err| ParseError::io(path, err))?;
    let mut lines = contents.lines();
    let header = lines.next().unwrap_or_default();
    let nattch_idx = header
        .split_whitespace()
        .position(|field| field == "nattch")
        .ok_or_else(|| ParseError::format(path, 1, "no nattch column"))?;

    let mut normal = 0u64;
    let mut orphan = 0u64;
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(attached) = fields
            .get(nattch_idx)
            .and_then(|value| value.parse::<u64>().ok())
        else {
            continue;
        };
        if attached > 0 {
            normal += 1;
        } else {
            orphan += 1;
        }
    }
    let mut shm = BTreeMap::new();
    shm.insert("normal".to_string(), normal);
    shm.insert("orphan".to_string(), orphan);
    Ok(shm)
}
