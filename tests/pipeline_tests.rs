use std::fs;
use std::path::Path;

use soakdiff::config::{Config, LogcatConfig};
use soakdiff::logcat::RuleSet;
use soakdiff::parse::load_round;
use soakdiff::report;
use soakdiff::snapshot::Snapshot;

/// Round bundle builder: writes a usage.csv (plus optional extras) shaped
/// like real collector output into one directory per round.
fn write_usage(
    dir: &Path,
    free_kb: u64,
    processes: &[(u32, &str, u32, u64, u64, u32)], // pid, name, ppid, vmsize, vmrss, fds
    mount_used: u64,
) {
    let mut usage = String::from(
        "generator = syte-endurance-stats v1.3\n\
         \n\
         SW-version : test-image 1.0\n\
         date : 2026-01-05 11:22:33\n\
         \n\
         MemTotal,MemFree,Buffers,Cached,SwapTotal,SwapFree\n",
    );
    usage.push_str(&format!(
        "262144 kB,{free_kb} kB,0 kB,0 kB,0 kB,0 kB\n\n"
    ));
    usage.push_str("Allocated FDs,Free FDs,Max FDs\n450,50,1024\n\n");
    usage.push_str("PID,FD count,Command\n");
    for &(pid, name, _, _, _, fds) in processes {
        usage.push_str(&format!("{pid},{fds},{name}\n"));
    }
    usage.push('\n');
    usage.push_str("Name,State,Tgid,Pid,PPid,VmSize,VmRSS,Threads:\n");
    for &(pid, name, ppid, vmsize, vmrss, _) in processes {
        usage.push_str(&format!(
            "{name},S (sleeping),{pid},{pid},{ppid},{vmsize} kB,{vmrss} kB,1\n"
        ));
    }
    usage.push('\n');
    usage.push_str("Filesystem,1k-blocks,Used,Available,Use%,Mountpoint\n");
    usage.push_str(&format!("/dev/root,262144,{mount_used},100,50%,/\n\n"));
    fs::write(dir.join("usage.csv"), usage).unwrap();
}

fn classifier() -> RuleSet {
    RuleSet::from_config(&LogcatConfig::default()).unwrap()
}

fn load(dir: &Path) -> Snapshot {
    load_round(dir, &classifier()).unwrap()
}

#[test]
fn two_round_bundle_produces_a_full_report() {
    let root = tempfile::tempdir().unwrap();
    let dir1 = root.path().join("round-0");
    let dir2 = root.path().join("round-1");
    fs::create_dir(&dir1).unwrap();
    fs::create_dir(&dir2).unwrap();

    write_usage(
        &dir1,
        130_000,
        &[(1, "init", 0, 2048, 512, 14), (100, "app", 1, 4096, 2000, 8)],
        100_000,
    );
    write_usage(
        &dir2,
        110_000,
        &[
            (1, "init", 0, 2048, 512, 14),
            (100, "app", 1, 4096, 2000, 20),
            (200, "newcomer", 1, 1024, 512, 3),
        ],
        104_000,
    );
    fs::write(
        dir2.join("syslog"),
        "Jan 5 device kernel: [99.0] Internal error: Oops: 7 [#1]\n",
    )
    .unwrap();

    let rounds = vec![load(&dir1), load(&dir2)];
    let config = Config::default();
    let data = report::analyze(&rounds, &config);

    // diff content survives the full pipeline
    assert_eq!(data.diffs.len(), 1);
    let diff = &data.diffs[0];
    assert_eq!(diff.free_change, -20_000);
    assert_eq!(diff.mounts.len(), 1);
    assert_eq!(diff.mounts[0].change, 4_000);
    assert_eq!(diff.fd_counts.len(), 1);
    assert_eq!(diff.fd_counts[0].label, "app[100]");
    assert_eq!(diff.processes.started.len(), 1);
    assert_eq!(diff.processes.started[0].name, "newcomer");
    assert_eq!(diff.errors.total(), 1);

    // error side page lands next to the data
    report::write_error_pages(&rounds, &data).unwrap();
    let page = fs::read_to_string(dir2.join("errors.html")).unwrap();
    assert!(page.contains("Kernel Oopses"));
    assert!(page.contains("Oops: 7"));

    // and the report renders
    let mut out = Vec::new();
    report::write_report(&mut out, &rounds, &data, &config).unwrap();
    let html = String::from_utf8(out).unwrap();
    assert!(html.contains("Endurance measurements report"));
    assert!(html.contains("newcomer[200]"));
    assert!(html.contains("app[100]"));
}

#[test]
fn missing_usage_csv_fails_the_round() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("round-0");
    fs::create_dir(&dir).unwrap();
    assert!(load_round(&dir, &classifier()).is_err());
}

#[test]
fn cumulative_logs_diff_to_new_lines_only() {
    let root = tempfile::tempdir().unwrap();
    let dir1 = root.path().join("round-0");
    let dir2 = root.path().join("round-1");
    fs::create_dir(&dir1).unwrap();
    fs::create_dir(&dir2).unwrap();

    write_usage(&dir1, 130_000, &[(1, "init", 0, 2048, 512, 14)], 100_000);
    write_usage(&dir2, 130_000, &[(1, "init", 0, 2048, 512, 14)], 100_000);
    let first = "Jan 5 device kernel: [99.0] Internal error: Oops: 7 [#1]\n";
    let second = "Jan 6 device kernel: [120.0] Internal error: Oops: 11 [#2]\n";
    fs::write(dir1.join("syslog"), first).unwrap();
    fs::write(dir2.join("syslog"), format!("{first}{second}")).unwrap();

    let rounds = vec![load(&dir1), load(&dir2)];
    let data = report::analyze(&rounds, &Config::default());

    assert_eq!(data.initial_errors.total(), 1);
    let new_lines = &data.diffs[0].errors.new_lines["Kernel Oopses"];
    assert_eq!(new_lines.len(), 1);
    assert!(new_lines[0].contains("Oops: 11"));
    assert!(data.diffs[0].errors.anomalies.is_empty());
}
