pub mod smaps;
pub mod stat;
pub mod usage;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use thiserror::Error;

use crate::logcat::LogClassifier;
use crate::snapshot::Snapshot;

/// Decoder failures. Only the mandatory usage file and a present-but-drifted
/// smaps capture produce these at the loader level; other artifacts degrade.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

impl ParseError {
    fn io(path: &Path, source: io::Error) -> Self {
        ParseError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn format(path: &Path, line: usize, message: impl Into<String>) -> Self {
        ParseError::Format {
            path: path.to_path_buf(),
            line,
            message: message.into(),
        }
    }
}

pub const USAGE_FILE: &str = "usage.csv";
pub const SMAPS_FILE: &str = "smaps.cap";
pub const STAT_FILE: &str = "stat";
pub const VMSTAT_FILE: &str = "vmstat";
pub const UPTIME_FILE: &str = "uptime";
pub const PIDSTAT_FILE: &str = "pidstat";
pub const SHM_FILE: &str = "shm";
pub const SYSLOG_FILE: &str = "syslog";

/// Loads one round directory into a snapshot.
///
/// `usage.csv` is mandatory; everything else is optional and a missing or
/// unreadable optional capture merely leaves its snapshot field unset, so
/// the matching report sections are omitted rather than the run aborted.
/// The one exception is a present smaps capture that no longer matches the
/// expected grammar: its totals would be silently wrong, so that stays
/// fatal.
pub fn load_round(dir: &Path, classifier: &dyn LogClassifier) -> Result<Snapshot, ParseError> {
    tracing::info!("parsing '{}'", dir.display());
    let mut snapshot = usage::parse_usage(&dir.join(USAGE_FILE))?;
    snapshot.basedir = dir.to_path_buf();

    let smaps_path = dir.join(SMAPS_FILE);
    if smaps_path.exists() {
        let (records, private_code) = smaps::parse_smaps(&smaps_path)?;
        snapshot.smaps = Some(records);
        snapshot.private_code = Some(private_code);
    }

    let stat_path = dir.join(STAT_FILE);
    if stat_path.exists() {
        match stat::parse_stat(&stat_path) {
            Ok(mut kernel) => {
                let vmstat_path = dir.join(VMSTAT_FILE);
                if vmstat_path.exists() {
                    match stat::parse_vmstat(&vmstat_path) {
                        Ok(counters) => {
                            kernel.page_faults = counters.page_faults;
                            kernel.swap_in = counters.swap_in.or(kernel.swap_in);
                            kernel.swap_out = counters.swap_out.or(kernel.swap_out);
                        }
                        Err(err) => tracing::warn!("skipping vmstat: {err}"),
                    }
                }
                snapshot.kernel = Some(kernel);
            }
            Err(err) => tracing::warn!("skipping kernel statistics: {err}"),
        }
    }

    let uptime_path = dir.join(UPTIME_FILE);
    if uptime_path.exists() {
        match stat::parse_uptime(&uptime_path) {
            Ok(uptime) => snapshot.uptime = Some(uptime),
            Err(err) => tracing::warn!("skipping uptime: {err}"),
        }
    }

    let pidstat_path = dir.join(PIDSTAT_FILE);
    if pidstat_path.exists() {
        match stat::parse_pidstat(&pidstat_path) {
            Ok(ticks) => snapshot.proc_ticks = Some(ticks),
            Err(err) => tracing::warn!("skipping per-process ticks: {err}"),
        }
    }

    let shm_path = dir.join(SHM_FILE);
    if shm_path.exists() {
        match stat::parse_shm(&shm_path) {
            Ok(shm) => snapshot.shm = shm,
            Err(err) => tracing::warn!("skipping shared memory segments: {err}"),
        }
    }

    if let Some(path) = log_path(dir) {
        match read_log_lines(&path) {
            Ok(lines) => snapshot.errors = Some(classifier.classify(&lines)),
            Err(err) => tracing::warn!("skipping log: {err}"),
        }
    }

    Ok(snapshot)
}

/// The round's log file, compressed or not.
fn log_path(dir: &Path) -> Option<PathBuf> {
    let plain = dir.join(SYSLOG_FILE);
    if plain.exists() {
        return Some(plain);
    }
    let gzipped = dir.join(format!("{SYSLOG_FILE}.gz"));
    gzipped.exists().then_some(gzipped)
}

fn read_log_lines(path: &Path) -> Result<Vec<String>, ParseError> {
    let file = File::open(path).map_err(|err| ParseError::io(path, err))?;
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    reader
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ParseError::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogcatConfig;
    use crate::logcat::RuleSet;
    use std::io::Write;

    const USAGE: &str = "\
generator = syte-endurance-stats v1.3

SW-version : test-image
date : 2026-01-05

MemTotal,MemFree,Buffers,Cached,SwapTotal,SwapFree
262144 kB,80000 kB,8000 kB,40000 kB,0 kB,0 kB

Allocated FDs,Free FDs,Max FDs
450,50,1024

PID,FD count,Command
1,14,init

Name,State,Tgid,Pid,PPid,VmSize,VmRSS,Threads:
init,S (sleeping),1,1,0,2048 kB,512 kB,1
";

    fn classifier() -> RuleSet {
        RuleSet::from_config(&LogcatConfig::default()).unwrap()
    }

    #[test]
    fn mandatory_usage_file_missing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_round(dir.path(), &classifier()).is_err());
    }

    #[test]
    fn minimal_round_loads_with_optional_data_unset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(USAGE_FILE), USAGE).unwrap();
        let snapshot = load_round(dir.path(), &classifier()).unwrap();
        assert_eq!(snapshot.basedir, dir.path());
        assert!(snapshot.smaps.is_none());
        assert!(snapshot.kernel.is_none());
        assert!(snapshot.uptime.is_none());
        assert!(snapshot.errors.is_none());
    }

    #[test]
    fn optional_files_populate_their_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(USAGE_FILE), USAGE).unwrap();
        std::fs::write(dir.path().join(STAT_FILE), "cpu 1 2 3 4\nintr 9\nctxt 10\n").unwrap();
        std::fs::write(dir.path().join(UPTIME_FILE), "100.5 200.0\n").unwrap();
        std::fs::write(
            dir.path().join(SYSLOG_FILE),
            "Jan 5 kernel: [1.0] Internal error: Oops: 7 [#1]\n",
        )
        .unwrap();
        let snapshot = load_round(dir.path(), &classifier()).unwrap();
        assert_eq!(snapshot.kernel.unwrap().interrupts, 9);
        assert_eq!(snapshot.uptime, Some(100.5));
        let errors = snapshot.errors.unwrap();
        assert_eq!(errors["Kernel Oopses"].len(), 1);
    }

    #[test]
    fn gzipped_logs_are_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(USAGE_FILE), USAGE).unwrap();
        let gz_path = dir.path().join("syslog.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&gz_path).unwrap(),
            flate2::Compression::default(),
        );
        encoder
            .write_all(b"Jan 5 kernel: [1.0] Internal error: Oops: 7 [#1]\n")
            .unwrap();
        encoder.finish().unwrap();
        let snapshot = load_round(dir.path(), &classifier()).unwrap();
        assert_eq!(snapshot.errors.unwrap()["Kernel Oopses"].len(), 1);
    }

    #[test]
    fn corrupt_optional_stat_degrades_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(USAGE_FILE), USAGE).unwrap();
        std::fs::write(dir.path().join(STAT_FILE), "no cpu line here\n").unwrap();
        let snapshot = load_round(dir.path(), &classifier()).unwrap();
        assert!(snapshot.kernel.is_none());
    }

    #[test]
    fn drifted_smaps_capture_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(USAGE_FILE), USAGE).unwrap();
        std::fs::write(
            dir.path().join(SMAPS_FILE),
            "#Pid: 10\n00008000+bogus mapping\n",
        )
        .unwrap();
        assert!(load_round(dir.path(), &classifier()).is_err());
    }
}
