use std::collections::BTreeMap;

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use soakdiff::config::ThresholdsConfig;
use soakdiff::diff::compare_rounds;
use soakdiff::snapshot::{Pid, Process, SmapsRecord, Snapshot};
use soakdiff::trend::{collect_trends, select_significant};

/// A synthetic round with `count` processes, perturbed by `offset` so the
/// diff engine has real work to do.
fn synthetic_round(count: u32, offset: u64) -> Snapshot {
    let mut snapshot = Snapshot::empty("SW bench", "date bench");
    snapshot.mem.ram_total = 512 * 1024;
    snapshot.mem.ram_free = 200 * 1024 - offset;
    let mut smaps = BTreeMap::new();
    for pid in 1..=count {
        let name = format!("proc-{:03}", pid % 97);
        snapshot.processes.insert(
            Pid(pid),
            Process {
                name: name.clone(),
                state: "S".to_string(),
                ppid: Pid(1),
                vm_size: 2048 + (pid as u64 * 7 + offset) % 512,
                vm_rss: 1024 + (pid as u64 * 3 + offset) % 256,
                threads: 1 + pid % 4,
            },
        );
        snapshot.commands.insert(Pid(pid), name);
        snapshot
            .fd_counts
            .insert(Pid(pid), 4 + (pid as u64 + offset) % 16);
        smaps.insert(
            Pid(pid),
            SmapsRecord {
                private_dirty: 512 + (pid as u64 * 11 + offset * 13) % 2048,
                swap: (pid as u64 + offset) % 64,
                pss: 1500,
                rss: 1024,
                size: 2048,
            },
        );
    }
    snapshot.smaps = Some(smaps);
    snapshot
}

fn bench_compare_rounds(c: &mut Criterion) {
    let thresholds = ThresholdsConfig::default();
    let round1 = synthetic_round(400, 0);
    let round2 = synthetic_round(400, 17);
    c.bench_function("compare_rounds_400_procs", |b| {
        b.iter(|| {
            black_box(compare_rounds(
                None,
                black_box(&round1),
                black_box(&round2),
                &thresholds,
            ))
        })
    });
}

fn bench_significance_filter(c: &mut Criterion) {
    let thresholds = ThresholdsConfig::default();
    let rounds: Vec<Snapshot> = (0..20).map(|idx| synthetic_round(400, idx * 17)).collect();
    c.bench_function("significance_filter_20x400", |b| {
        b.iter(|| {
            let trends = collect_trends(black_box(&rounds));
            black_box(select_significant(trends, &rounds, &thresholds, false))
        })
    });
}

criterion_group!(benches, bench_compare_rounds, bench_significance_filter);
criterion_main!(benches);
