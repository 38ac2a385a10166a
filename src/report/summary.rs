use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

use serde::Serialize;

use crate::snapshot::Snapshot;

use super::ReportData;

/// Machine-readable run summary, for trend dashboards and CI gates that
/// should not have to scrape the HTML comments.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub release: String,
    pub rounds: usize,
    pub pairs: Vec<PairSummary>,
    pub error_totals: BTreeMap<String, usize>,
    pub graphed_processes: usize,
}

#[derive(Debug, Serialize)]
pub struct PairSummary {
    /// 1-based number of the later round of the pair.
    pub round: usize,
    pub free_change_kb: i64,
    pub fd_free_change: i64,
    pub process_net_change: i64,
    pub reboot_suspected: bool,
    pub release_mismatch: bool,
    pub new_log_items: usize,
}

pub fn build(rounds: &[Snapshot], data: &ReportData) -> Summary {
    Summary {
        release: rounds[0].release.clone(),
        rounds: rounds.len(),
        pairs: data
            .diffs
            .iter()
            .enumerate()
            .map(|(idx, diff)| PairSummary {
                round: idx + 1,
                free_change_kb: diff.free_change,
                fd_free_change: diff.fd_free_change,
                process_net_change: diff.processes.net_change,
                reboot_suspected: diff.reboot_suspected,
                release_mismatch: diff.release_mismatch.is_some(),
                new_log_items: diff.errors.total(),
            })
            .collect(),
        error_totals: data.error_totals.clone(),
        graphed_processes: data.trends.len(),
    }
}

pub fn write_json(path: &Path, rounds: &[Snapshot], data: &ReportData) -> io::Result<()> {
    let summary = build(rounds, data);
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, &summary).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::report::analyze;

    #[test]
    fn summary_tracks_pairs_and_totals() {
        let mut round1 = Snapshot::empty("SW 1.0", "date 1");
        round1.mem.ram_total = 1000;
        round1.mem.ram_free = 500;
        let mut round2 = round1.clone();
        round2.mem.ram_free = 400;
        let mut round3 = round1.clone();
        round3.mem.ram_free = 350;

        let rounds = vec![round1, round2, round3];
        let data = analyze(&rounds, &Config::default());
        let summary = build(&rounds, &data);

        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.pairs.len(), 2);
        assert_eq!(summary.pairs[0].round, 1);
        assert_eq!(summary.pairs[0].free_change_kb, -100);
        assert_eq!(summary.pairs[1].free_change_kb, -50);
        assert!(!summary.pairs[0].reboot_suspected);
    }

    #[test]
    fn summary_serializes() {
        let mut round1 = Snapshot::empty("SW 1.0", "date 1");
        round1.mem.ram_total = 1000;
        round1.mem.ram_free = 500;
        let rounds = vec![round1.clone(), round1];
        let data = analyze(&rounds, &Config::default());
        let json = serde_json::to_string(&build(&rounds, &data)).unwrap();
        assert!(json.contains("\"release\":\"SW 1.0\""));
        assert!(json.contains("\"rounds\":2"));
    }
}
