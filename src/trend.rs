use std::collections::BTreeMap;

use crate::config::ThresholdsConfig;
use crate::snapshot::classify::is_main_thread;
use crate::snapshot::{Pid, Snapshot};

/// One process's observation in one round, kilobytes and cumulative ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrendSample {
    pub rss: u64,
    pub size: u64,
    pub dirty_and_swap: Option<u64>,
    pub cpu_ticks: Option<u64>,
}

/// A process's memory trajectory across the whole round sequence. Identity
/// is name plus PID: a PID recycled after a reboot must never continue a
/// different process's graph.
#[derive(Clone, Debug)]
pub struct ProcessTrend {
    pub name: String,
    pub pid: Pid,
    pub first_round: usize,
    /// One slot per round, `None` where the process was absent.
    pub samples: Vec<Option<TrendSample>>,
}

impl ProcessTrend {
    pub fn rounds_present(&self) -> usize {
        self.samples.iter().flatten().count()
    }

    fn observed(&self) -> impl Iterator<Item = (usize, &TrendSample)> {
        self.samples
            .iter()
            .enumerate()
            .filter_map(|(idx, sample)| sample.as_ref().map(|sample| (idx, sample)))
    }
}

/// Gathers per-process trajectories over the full sequence. Secondary
/// threads are dropped here once so no downstream consumer double-counts
/// them.
pub fn collect_trends(rounds: &[Snapshot]) -> Vec<ProcessTrend> {
    let mut by_identity: BTreeMap<(String, Pid), ProcessTrend> = BTreeMap::new();
    for (round_idx, round) in rounds.iter().enumerate() {
        for (&pid, process) in &round.processes {
            let Some(name) = round.commands.get(&pid) else {
                tracing::debug!(
                    "{}[{pid}] in process table but not in FD table",
                    process.name
                );
                continue;
            };
            if !is_main_thread(pid, &round.commands, &round.processes) {
                continue;
            }
            let trend = by_identity
                .entry((name.clone(), pid))
                .or_insert_with(|| ProcessTrend {
                    name: name.clone(),
                    pid,
                    first_round: round_idx,
                    samples: vec![None; rounds.len()],
                });
            trend.samples[round_idx] = Some(TrendSample {
                rss: process.vm_rss,
                size: process.vm_size,
                dirty_and_swap: round
                    .smaps
                    .as_ref()
                    .and_then(|smaps| smaps.get(&pid))
                    .map(|record| record.dirty_and_swap()),
                cpu_ticks: round
                    .proc_ticks
                    .as_ref()
                    .and_then(|ticks| ticks.get(&pid))
                    .map(|ticks| ticks.total()),
            });
        }
    }
    let mut trends: Vec<ProcessTrend> = by_identity.into_values().collect();
    trends.sort_by(|a, b| {
        (&a.name, a.first_round, a.pid).cmp(&(&b.name, b.first_round, b.pid))
    });
    trends
}

/// Filters trajectories down to the ones worth a usage-over-time graph.
/// An endurance run covering every daemon on the device would otherwise
/// produce hundreds of flat graphs; this exists purely for the reader's
/// signal-to-noise ratio.
pub fn select_significant(
    trends: Vec<ProcessTrend>,
    rounds: &[Snapshot],
    thresholds: &ThresholdsConfig,
    show_all: bool,
) -> Vec<ProcessTrend> {
    if show_all {
        return trends;
    }
    let have_smaps = rounds.iter().any(|round| round.smaps.is_some());
    trends
        .into_iter()
        .filter(|trend| is_significant(trend, rounds, thresholds, have_smaps))
        .collect()
}

fn is_significant(
    trend: &ProcessTrend,
    rounds: &[Snapshot],
    thresholds: &ThresholdsConfig,
    have_smaps: bool,
) -> bool {
    let pidrounds = trend.rounds_present();
    if pidrounds == 0 {
        return false;
    }

    let lifetime_ticks = lifetime_cpu_ticks(trend);
    if is_cpu_hogger(trend, rounds, lifetime_ticks, thresholds.cpu_hog_share) {
        return true;
    }

    if pidrounds == 1 {
        // One-shot processes get graphed only when they were big enough
        // to matter at all.
        return trend.observed().next().is_some_and(|(_, sample)| {
            sample.dirty_and_swap.unwrap_or(sample.rss) >= thresholds.single_round_floor_kb
        });
    }

    // Ranges exclude the initial-state round: the baseline is not a
    // change, and counting it would flag every process that simply starts
    // with nonzero memory.
    let mut dirty_range: Option<(u64, u64)> = None;
    let mut size_range: Option<(u64, u64)> = None;
    for (round_idx, sample) in trend.observed() {
        if round_idx == 0 {
            continue;
        }
        if let Some(dirty) = sample.dirty_and_swap {
            dirty_range = Some(match dirty_range {
                Some((min, max)) => (min.min(dirty), max.max(dirty)),
                None => (dirty, dirty),
            });
        }
        size_range = Some(match size_range {
            Some((min, max)) => (min.min(sample.size), max.max(sample.size)),
            None => (sample.size, sample.size),
        });
    }

    let rel_change = |range: Option<(u64, u64)>| match range {
        Some((min, max)) if max > 0 => {
            (max - min) as f64 / max as f64 / pidrounds as f64 > thresholds.rel_change_per_round
        }
        _ => false,
    };
    let dirty_span = dirty_range.map_or(0, |(min, max)| max - min);
    let dirty_trend = rel_change(dirty_range) && dirty_span >= thresholds.min_dirty_range_kb;
    let size_trend = rel_change(size_range);

    let observed: Vec<&TrendSample> = trend.observed().map(|(_, sample)| sample).collect();
    let changerounds = observed
        .windows(2)
        .filter(|pair| {
            let dirty_changed = match (pair[0].dirty_and_swap, pair[1].dirty_and_swap) {
                (Some(before), Some(after)) => before != after,
                _ => false,
            };
            dirty_changed || pair[0].size != pair[1].size
        })
        .count();
    let frequent = 2 * changerounds >= pidrounds;

    if !(dirty_trend || size_trend || frequent) {
        return false;
    }

    // A process that never ran is not leaking, it is just being paged
    // around; but CPU accounting alone is too weak a signal to veto on
    // when there is no memory-scan data anywhere to corroborate it.
    if have_smaps && lifetime_ticks == Some(0) {
        return false;
    }
    true
}

/// Ticks the process consumed between its first and last observation, when
/// the captures allow computing that.
fn lifetime_cpu_ticks(trend: &ProcessTrend) -> Option<u64> {
    let mut ticks = trend
        .observed()
        .filter_map(|(_, sample)| sample.cpu_ticks);
    let first = ticks.next()?;
    let last = ticks.last().unwrap_or(first);
    Some(last.saturating_sub(first))
}

fn is_cpu_hogger(
    trend: &ProcessTrend,
    rounds: &[Snapshot],
    lifetime_ticks: Option<u64>,
    hog_share: f64,
) -> bool {
    let Some(lifetime_ticks) = lifetime_ticks else {
        return false;
    };
    let mut observed = trend.observed();
    let Some((first_idx, _)) = observed.next() else {
        return false;
    };
    let last_idx = observed.last().map_or(first_idx, |(idx, _)| idx);
    let elapsed = match (&rounds[first_idx].kernel, &rounds[last_idx].kernel) {
        (Some(first), Some(last)) => last.cpu.total() as i64 - first.cpu.total() as i64,
        _ => return false,
    };
    if elapsed <= 0 {
        return false;
    }
    lifetime_ticks as f64 / elapsed as f64 > hog_share
}
