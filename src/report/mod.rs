pub mod html;
pub mod summary;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::config::Config;
use crate::diff::errors::{ErrorDiff, diff_error_categories};
use crate::diff::kernel::{CpuUsageDiff, KernelRates, TickComparison};
use crate::diff::population::PopulationDiff;
use crate::diff::{DiffRecord, RoundDiff, compare_rounds};
use crate::format;
use crate::snapshot::Snapshot;
use crate::trend::{ProcessTrend, collect_trends, select_significant};

use html::{BarSegment, colors, escape, slug};

/// Everything derived from the round sequence, ready for rendering.
pub struct ReportData {
    /// Pairwise diffs; `diffs[i]` compares round i to round i+1.
    pub diffs: Vec<RoundDiff>,
    /// First test round against the last, with the initial state as the
    /// change-from-initial reference. `None` with fewer than three rounds.
    pub summary_diff: Option<RoundDiff>,
    pub trends: Vec<ProcessTrend>,
    /// The initial round's log lines, all counted as new.
    pub initial_errors: ErrorDiff,
    /// New-log-line totals accumulated over every test round.
    pub error_totals: BTreeMap<String, usize>,
}

pub fn analyze(rounds: &[Snapshot], config: &Config) -> ReportData {
    let diffs: Vec<RoundDiff> = rounds
        .windows(2)
        .enumerate()
        .map(|(idx, pair)| {
            let initial = (idx > 0).then_some(&rounds[0]);
            compare_rounds(initial, &pair[0], &pair[1], &config.thresholds)
        })
        .collect();

    let summary_diff = (rounds.len() > 2).then(|| {
        compare_rounds(
            Some(&rounds[0]),
            &rounds[1],
            &rounds[rounds.len() - 1],
            &config.thresholds,
        )
    });

    let trends = select_significant(
        collect_trends(rounds),
        rounds,
        &config.thresholds,
        config.report.show_all_processes,
    );

    let mut error_totals: BTreeMap<String, usize> = BTreeMap::new();
    for diff in &diffs {
        for (category, count) in diff.errors.counts() {
            *error_totals.entry(category).or_insert(0) += count;
        }
    }

    ReportData {
        diffs,
        summary_diff,
        trends,
        initial_errors: diff_error_categories(None, rounds[0].errors.as_ref()),
        error_totals,
    }
}

pub fn write_report<W: Write>(
    w: &mut W,
    rounds: &[Snapshot],
    data: &ReportData,
    config: &Config,
) -> io::Result<()> {
    let title = "Endurance measurements report";
    writeln!(w, "<html>\n<head>\n<title>{title}</title>\n</head>\n<body>")?;
    writeln!(w, "<h1>{title}</h1>\n")?;
    writeln!(w, "<!-- soakdiff v{} -->\n", env!("CARGO_PKG_VERSION"))?;

    writeln!(w, "<p><b>Contents:</b>\n<ul>")?;
    writeln!(w, "<li><a href=\"#initial-state\">Initial state</a>")?;
    writeln!(w, "<li>Memory usage overview for the test rounds:\n  <ul>")?;
    writeln!(w, "    <li><a href=\"#system-memory\">System memory usage</a>")?;
    writeln!(w, "    <li><a href=\"#process-memory\">Processes memory usage</a>")?;
    writeln!(w, "  </ul>")?;
    writeln!(w, "<li>Resource usage changes for each of the test rounds:\n  <ul>")?;
    for round in 1..rounds.len() {
        writeln!(w, "    <li><a href=\"#round-{round}\">Round {round}</a>")?;
    }
    writeln!(w, "  </ul>")?;
    writeln!(w, "<li>Summary of changes between all the rounds:\n  <ul>")?;
    writeln!(w, "    <li><a href=\"#error-summary\">Error summary</a>")?;
    writeln!(w, "    <li><a href=\"#resource-summary\">Resource usage summary</a>")?;
    writeln!(w, "  </ul>\n</ul>\n<hr>")?;

    write_initial_state(w, &rounds[0], data)?;

    writeln!(w, "\n<a name=\"system-memory\"></a>")?;
    writeln!(w, "<h2>Memory usage overview for the test rounds</h2>")?;
    writeln!(w, "<h3>System memory usage</h3>")?;
    write_system_memory_graphs(w, rounds, config)?;
    writeln!(w, "<hr>\n<a name=\"process-memory\"></a>")?;
    writeln!(w, "<h3>Processes memory usage</h3>")?;
    write_process_memory_graphs(w, rounds, data, config)?;

    writeln!(w, "<hr>\n<h2>Resource usage changes for the test rounds</h2>")?;
    for (idx, diff) in data.diffs.iter().enumerate() {
        let round = idx + 1;
        let heading = if idx == 0 {
            "Test round 1 differences from initial state".to_string()
        } else {
            format!("Test round {round} differences from round {idx}")
        };
        writeln!(w, "\n<a name=\"round-{round}\"></a>")?;
        writeln!(w, "<h3>{heading}</h3>")?;
        writeln!(w, "<p>{}", escape(&rounds[round].datetime))?;
        write_round_section(w, &rounds[round], diff, config, false)?;
        write_data_links(w, &rounds[round])?;
        writeln!(w, "\n<hr>")?;
    }

    writeln!(w, "\n<a name=\"error-summary\"></a>")?;
    writeln!(
        w,
        "<h2>Summary of changes between test rounds 1 - {}</h2>",
        rounds.len() - 1
    )?;
    writeln!(w, "<h3>Error summary</h3>")?;
    write_error_totals(w, &data.error_totals)?;
    writeln!(w, "<!-- summary for automatic parsing:")?;
    for (category, count) in &data.error_totals {
        writeln!(w, "- {count} {category}")?;
    }
    writeln!(w, "-->")?;

    writeln!(w, "\n<hr>\n<a name=\"resource-summary\"></a>")?;
    writeln!(w, "<h3>Resource usage summary</h3>")?;
    match &data.summary_diff {
        Some(diff) => {
            writeln!(
                w,
                "<p><font color=\"red\">NOTE</font>: Process specific resource usage \
                 changes are shown only for processes which exist in both of the \
                 compared rounds!"
            )?;
            write_round_section(w, &rounds[rounds.len() - 1], diff, config, true)?;
        }
        None => {
            writeln!(
                w,
                "<p>Only one test round; see <a href=\"#round-1\">its changes</a>."
            )?;
        }
    }

    writeln!(w, "\n</body></html>")?;
    Ok(())
}

fn write_initial_state<W: Write>(
    w: &mut W,
    initial: &Snapshot,
    data: &ReportData,
) -> io::Result<()> {
    writeln!(w, "<a name=\"initial-state\"></a>\n<h2>Initial state</h2>")?;
    writeln!(w, "<p>{}", escape(&initial.release))?;
    writeln!(w, "<p>{}", escape(&initial.datetime))?;
    writeln!(
        w,
        "<p>Free system memory: <b>{}</b> kB",
        initial.mem.free_total()
    )?;
    writeln!(w, "<br>(free = free + cached + buffered + reclaimable)")?;
    if let Some(private_code) = initial.private_code.filter(|&kb| kb > 0) {
        writeln!(w, "<p>Private dirty code pages: <b>{private_code}</b> kB")?;
        writeln!(
            w,
            "<br><i>(this means the system has incorrectly built shared libraries)</i>"
        )?;
    }
    if !data.initial_errors.is_empty() {
        write_error_section(w, initial, &data.initial_errors)?;
    }
    write_data_links(w, initial)?;
    writeln!(w, "<hr>")?;
    Ok(())
}

fn write_round_section<W: Write>(
    w: &mut W,
    round2: &Snapshot,
    diff: &RoundDiff,
    config: &Config,
    do_summary: bool,
) -> io::Result<()> {
    if let Some((before, after)) = &diff.release_mismatch {
        writeln!(
            w,
            "<p><font color=\"red\">Release '{}' does not match previous round \
             release '{}'.</font>",
            escape(after),
            escape(before)
        )?;
    }
    if diff.reboot_suspected {
        writeln!(
            w,
            "<p><font color=\"red\">Uptime went backwards: the device rebooted \
             between these rounds.</font>"
        )?;
    }
    if !do_summary && !diff.errors.is_empty() {
        write_error_section(w, round2, &diff.errors)?;
    }

    writeln!(w, "<h4>Resource usage changes</h4>")?;
    writeln!(
        w,
        "<p>System free memory change: <b>{}</b> kB",
        format::signed(diff.free_change)
    )?;
    writeln!(
        w,
        "<br>System unused file descriptor change: <b>{}</b>",
        format::signed(diff.fd_free_change)
    )?;
    if diff.fd_free < config.report.fd_warn_level {
        writeln!(
            w,
            "<br><font color=\"red\">Less than {} FDs are free in the system.</font>",
            config.report.fd_warn_level
        )?;
    } else if diff.fd_free < config.report.fd_note_level {
        writeln!(
            w,
            "<br>(Less than {} FDs are free in the system.)",
            config.report.fd_note_level
        )?;
    }
    if let Some(change) = diff.private_code_change {
        writeln!(
            w,
            "<p>System private dirty code pages change: <b>{}</b> kB",
            format::signed(change)
        )?;
    }
    if do_summary {
        writeln!(
            w,
            "<!--\n- System free memory change: {}\n- System free FD change: {}\n-->",
            format::signed(diff.free_change),
            format::signed(diff.fd_free_change)
        )?;
    }

    write_diff_table(
        w,
        &diff.mounts,
        "Filesystem usage",
        "Mount:",
        " kB",
        colors::DISK,
        do_summary,
    )?;
    match &diff.proc_memory {
        Some(proc_memory) => write_diff_table(
            w,
            proc_memory,
            "Process private memory usage (dirty + swap)",
            "Command[Pid]:",
            " kB",
            colors::MEMORY,
            do_summary,
        )?,
        None => writeln!(
            w,
            "<p>No detailed memory data for process private memory usage available."
        )?,
    }
    write_diff_table(
        w,
        &diff.xclient_mem,
        "X resource memory usage",
        "X client:",
        " kB",
        colors::XRES,
        do_summary,
    )?;
    write_diff_table(
        w,
        &diff.xclient_count,
        "X resource counts",
        "X client:",
        "",
        colors::XRES,
        do_summary,
    )?;
    write_diff_table(
        w,
        &diff.shm,
        "Shared memory segments",
        "Type:",
        "",
        colors::MEMORY,
        do_summary,
    )?;
    write_diff_table(
        w,
        &diff.fd_counts,
        "Process file descriptor count",
        "Command[Pid]:",
        "",
        colors::FDS,
        do_summary,
    )?;

    write_kernel_section(w, diff)?;
    if let Some(usage) = &diff.cpu_usage {
        write_cpu_section(w, usage, config)?;
    }

    writeln!(w, "\n<h4>Changes in processes</h4>")?;
    write_diff_table(
        w,
        &diff.thread_counts,
        "Process thread count",
        "Command[Pid]:",
        "",
        colors::THREADS,
        do_summary,
    )?;
    write_population(
        w,
        &diff.processes,
        (
            "Change in number of processes",
            "Exited processes",
            "New processes",
        ),
        do_summary,
    )?;
    write_population(
        w,
        &diff.kernel_threads,
        (
            "Change in number of kernel threads and zombie processes",
            "Collected kthreads/zombies",
            "New kthreads/zombies",
        ),
        do_summary,
    )?;
    Ok(())
}

fn write_diff_table<W: Write>(
    w: &mut W,
    diffs: &[DiffRecord],
    title: &str,
    column: &str,
    unit: &str,
    color: &str,
    do_summary: bool,
) -> io::Result<()> {
    let total: i64 = diffs.iter().map(|record| record.change).sum();
    if !diffs.is_empty() {
        let with_initial = diffs
            .iter()
            .any(|record| record.change_from_initial.is_some());
        writeln!(w, "\n<p><table border=1 bgcolor=\"#{color}\">")?;
        writeln!(w, "<caption><i>{title}</i></caption>")?;
        write!(w, "<tr><th>{column}</th><th>Change:</th>")?;
        if with_initial {
            write!(w, "<th>From initial:</th>")?;
        }
        writeln!(w, "<th>Total:</th></tr>")?;
        for record in diffs {
            write!(
                w,
                "<tr><td>{}</td><td align=right><b>{}</b>{unit}</td>",
                escape(&record.label),
                format::signed(record.change)
            )?;
            if with_initial {
                match record.change_from_initial {
                    Some(change) => {
                        write!(w, "<td align=right>{}{unit}</td>", format::signed(change))?
                    }
                    None => write!(w, "<td>&nbsp;</td>")?,
                }
            }
            writeln!(w, "<td align=right>{}{unit}</td></tr>", record.total)?;
        }
        write!(
            w,
            "<tr><td align=right><i>Total change =</i></td>\
             <td align=right><b>{}{unit}</b></td>",
            format::signed(total)
        )?;
        if with_initial {
            write!(w, "<td>&nbsp;</td>")?;
        }
        writeln!(w, "<td>&nbsp;</td></tr>\n</table>")?;
    }
    if do_summary {
        writeln!(
            w,
            "<!--\n- {title} change: {}\n-->",
            format::signed(total)
        )?;
    }
    Ok(())
}

fn write_population<W: Write>(
    w: &mut W,
    diff: &PopulationDiff,
    titles: (&str, &str, &str),
    do_summary: bool,
) -> io::Result<()> {
    let (title, exited_title, started_title) = titles;
    if !diff.is_empty() {
        writeln!(
            w,
            "<p>{title}: <b>{}</b>",
            format::signed(diff.net_change)
        )?;
        writeln!(w, "<br>(now totaling {}).", diff.total)?;
        writeln!(w, "<p><table border=1>")?;
        writeln!(w, "<tr><th>{exited_title}</th><th>{started_title}</th></tr>")?;
        write!(w, "<tr><td>")?;
        write_population_list(w, &diff.exited)?;
        write!(w, "</td><td>")?;
        write_population_list(w, &diff.started)?;
        writeln!(w, "</td></tr></table>")?;
    }
    if do_summary {
        writeln!(
            w,
            "<!--\n- {title}: {}\n-->",
            format::signed(diff.net_change)
        )?;
    }
    Ok(())
}

fn write_population_list<W: Write>(
    w: &mut W,
    entries: &[crate::diff::population::PopulationEntry],
) -> io::Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    writeln!(w, "<ul>")?;
    for entry in entries {
        let label = format!("{}[{}]", escape(&entry.name), entry.pid);
        if entry.respawn {
            // respawned by a supervisor; normal churn, no emphasis
            writeln!(w, "<li><i>{label}</i>")?;
        } else {
            writeln!(w, "<li><b>{label}</b>")?;
        }
    }
    writeln!(w, "</ul>")?;
    Ok(())
}

fn write_kernel_section<W: Write>(w: &mut W, diff: &RoundDiff) -> io::Result<()> {
    let Some(comparison) = &diff.kernel else {
        return Ok(());
    };
    match comparison {
        TickComparison::RebootDetected => writeln!(
            w,
            "<p><font color=\"red\">Reboot detected (CPU tick counters went \
             backwards); kernel event rates omitted for this round.</font>"
        ),
        TickComparison::NoElapsedTime => writeln!(
            w,
            "<p><font color=\"red\">No CPU time elapsed between the compared \
             rounds (duplicate snapshot?); kernel event rates omitted.</font>"
        ),
        TickComparison::Rates(rates) => write_kernel_rates(w, rates),
    }
}

fn write_kernel_rates<W: Write>(w: &mut W, rates: &KernelRates) -> io::Result<()> {
    writeln!(w, "\n<p><table border=1 bgcolor=\"#{}\">", colors::THREADS)?;
    writeln!(
        w,
        "<caption><i>Kernel events over {} seconds</i></caption>",
        format::rate(rates.elapsed_secs)
    )?;
    writeln!(w, "<tr><th>Event:</th><th>Per second:</th></tr>")?;
    let mut row = |name: &str, value: f64| {
        writeln!(
            w,
            "<tr><td>{name}</td><td align=right>{}</td></tr>",
            format::rate(value)
        )
    };
    row("Interrupts", rates.interrupts_per_sec)?;
    row("Context switches", rates.context_switches_per_sec)?;
    if let Some(rate) = rates.page_faults_per_sec {
        row("Page faults", rate)?;
    }
    if let Some(rate) = rates.swap_in_per_sec {
        row("Pages swapped in", rate)?;
    }
    if let Some(rate) = rates.swap_out_per_sec {
        row("Pages swapped out", rate)?;
    }
    writeln!(w, "</table>")?;
    Ok(())
}

fn write_cpu_section<W: Write>(
    w: &mut W,
    usage: &CpuUsageDiff,
    config: &Config,
) -> io::Result<()> {
    if usage.entries.is_empty() && usage.filtered_count == 0 {
        return Ok(());
    }
    writeln!(w, "\n<p><table border=1 bgcolor=\"#{}\">", colors::THREADS)?;
    writeln!(w, "<caption><i>Process CPU usage</i></caption>")?;
    writeln!(
        w,
        "<tr><th>Command[Pid]:</th><th>Ticks:</th><th>Of elapsed:</th></tr>"
    )?;
    for entry in &usage.entries {
        writeln!(
            w,
            "<tr><td>{}</td><td align=right>{}</td><td align=right>{}</td></tr>",
            escape(&entry.label),
            entry.ticks,
            format::percent(entry.share)
        )?;
    }
    // short-lived processes leave ticks nobody accounts for; a negative
    // value here is accounting noise and shown as such
    writeln!(
        w,
        "<tr><td><i>(processes started and exited within the round)</i></td>\
         <td align=right>{}</td><td>&nbsp;</td></tr>",
        usage.unaccounted_ticks
    )?;
    writeln!(w, "</table>")?;
    if usage.filtered_count > 0 {
        writeln!(
            w,
            "<p>({} processes below {} of elapsed ticks used {} ticks in total.)",
            usage.filtered_count,
            format::percent(config.thresholds.cpu_show_share),
            usage.filtered_ticks
        )?;
    }
    Ok(())
}

fn write_error_section<W: Write>(
    w: &mut W,
    round: &Snapshot,
    errors: &ErrorDiff,
) -> io::Result<()> {
    for category in &errors.anomalies {
        writeln!(
            w,
            "<p><font color=\"red\">Warning: the '{}' log list does not extend \
             the previous round's; its full contents are listed as new.</font>",
            escape(category)
        )?;
    }
    let counts = errors.counts();
    if counts.is_empty() {
        return Ok(());
    }
    let page = error_page_path(round);
    writeln!(w, "\n<p><table border=1 bgcolor=\"#{}\">", colors::ERRORS)?;
    writeln!(w, "<caption><i>Items logged to syslog</i></caption>")?;
    writeln!(w, "<tr><th>Error types:</th><th>Count:</th></tr>")?;
    for (category, count) in &counts {
        writeln!(
            w,
            "<tr><td align=left><a href=\"{}#{}\">{}</a></td>\
             <td align=right>{count}</td></tr>",
            page.display(),
            slug(category),
            escape(category)
        )?;
    }
    writeln!(
        w,
        "<tr><td align=right><i>Total of items =</i></td>\
         <td align=right><b>{}</b></td></tr>",
        errors.total()
    )?;
    writeln!(w, "</table>")?;
    Ok(())
}

fn write_error_totals<W: Write>(
    w: &mut W,
    totals: &BTreeMap<String, usize>,
) -> io::Result<()> {
    if totals.is_empty() {
        writeln!(w, "<p>No notifiable log items identified.")?;
        return Ok(());
    }
    writeln!(w, "\n<p><table border=1 bgcolor=\"#{}\">", colors::ERRORS)?;
    writeln!(w, "<caption><i>Items logged to syslog</i></caption>")?;
    writeln!(w, "<tr><th>Error types:</th><th>Count:</th></tr>")?;
    let mut sum = 0usize;
    for (category, count) in totals {
        sum += count;
        writeln!(
            w,
            "<tr><td align=left>{}</td><td align=right>{count}</td></tr>",
            escape(category)
        )?;
    }
    writeln!(
        w,
        "<tr><td align=right><i>Total of items =</i></td>\
         <td align=right><b>{sum}</b></td></tr>\n</table>"
    )?;
    Ok(())
}

fn write_data_links<W: Write>(w: &mut W, round: &Snapshot) -> io::Result<()> {
    let basedir = &round.basedir;
    writeln!(w, "<h4>For more details on...</h4>\n<ul>")?;
    for log in ["syslog", "syslog.gz"] {
        if basedir.join(log).exists() {
            writeln!(
                w,
                "<li>log messages, see <a href=\"{}\">syslog</a>",
                basedir.join(log).display()
            )?;
            break;
        }
    }
    if basedir.join(crate::parse::SMAPS_FILE).exists() {
        writeln!(
            w,
            "<li>private memory usage of all processes, see \
             <a href=\"{}\">smaps data</a>",
            basedir.join(crate::parse::SMAPS_FILE).display()
        )?;
    }
    writeln!(
        w,
        "<li>process and device state details, see \
         <a href=\"{}\">collected CSV data</a>",
        basedir.join(crate::parse::USAGE_FILE).display()
    )?;
    if basedir.join(crate::parse::STAT_FILE).exists() {
        writeln!(
            w,
            "<li>rest of kernel statistics, see <a href=\"{}\">stat</a>",
            basedir.join(crate::parse::STAT_FILE).display()
        )?;
    }
    writeln!(w, "</ul>")?;
    Ok(())
}

// ------------------- memory overview graphs -------------------------

fn write_system_memory_graphs<W: Write>(
    w: &mut W,
    rounds: &[Snapshot],
    config: &Config,
) -> io::Result<()> {
    let mut limited = false;
    writeln!(w, "<table>")?;
    writeln!(
        w,
        "<tr><td><i>Test-case:</i></td><td><i>Memory usage graph:</i></td>\
         <td><i>used:</i></td><td><i>free:</i></td><td><i>swap:</i></td></tr>"
    )?;
    for (idx, round) in rounds.iter().enumerate() {
        let case = if idx == 0 {
            "<a href=\"#initial-state\">Initial state</a>:".to_string()
        } else {
            format!("<a href=\"#round-{idx}\">Test round {idx:02}</a>:")
        };
        let total = round.mem.total().max(1) as f64;
        // platform limits as kB, or the OOM emphasis fallback
        let (low, high, deny) = if round.limits.in_effect() {
            limited = true;
            (
                total * round.limits.low as f64 / 100.0,
                total * round.limits.high as f64 / 100.0,
                total * round.limits.deny as f64 / 100.0,
            )
        } else {
            let deny = total * config.thresholds.oom_used_percent as f64 / 100.0;
            (deny, deny, deny)
        };
        let used = round.mem.used_total() as f64;
        let free = round.mem.free_total() as f64;

        let used_text = if used > high {
            format!("<font color=\"red\"><b>{}</b></font>", round.mem.used_total())
        } else if used > low {
            format!("<font color=\"blue\"><b>{}</b></font>", round.mem.used_total())
        } else {
            format!("{}", round.mem.used_total())
        };
        let swap_text = if round.mem.swap_used() > 0 {
            format!("({}kB)", round.mem.swap_used())
        } else {
            "&nbsp;".to_string()
        };

        let (show_free, show_deny) = if used > deny {
            (0.0, (total - used) / total)
        } else {
            ((free - total + deny) / total, 1.0 - deny / total)
        };
        let bar = html::bar(
            &[
                BarSegment {
                    color: colors::BAR_USED,
                    fraction: used / total,
                },
                BarSegment {
                    color: colors::BAR_FREE,
                    fraction: show_free,
                },
                BarSegment {
                    color: colors::BAR_DENY,
                    fraction: show_deny,
                },
            ],
            config.report.graph_width,
        );
        writeln!(
            w,
            "<tr><td>{case}</td><td>{bar}</td>\
             <td align=\"right\">{used_text}kB</td>\
             <td align=\"right\">{}kB</td><td align=\"right\">{swap_text}</td></tr>",
            round.mem.free_total()
        )?;
    }
    writeln!(w, "</table>")?;

    writeln!(w, "<table>")?;
    writeln!(w, "<tr><th></th><th align=\"left\">Legend:</th></tr>")?;
    writeln!(
        w,
        "<tr><td bgcolor=\"#{}\" height=\"16\" width=\"16\"></td>\
         <td>Memory used in the device</td></tr>",
        colors::BAR_USED
    )?;
    writeln!(
        w,
        "<tr><td bgcolor=\"#{}\" height=\"16\" width=\"16\"></td>\
         <td>Memory freely usable in the device (free/cached/buffered)</td></tr>",
        colors::BAR_FREE
    )?;
    writeln!(
        w,
        "<tr><td bgcolor=\"#{}\" height=\"16\" width=\"16\"></td>\
         <td>Memory use at which allocations fail and the allocating \
         application is OOM-killed</td></tr>",
        colors::BAR_DENY
    )?;
    writeln!(w, "</table>")?;
    if !limited {
        writeln!(
            w,
            "<p>(No platform low-memory limits in effect; OOM emphasis at {}% \
             of total memory.)",
            config.thresholds.oom_used_percent
        )?;
    }
    Ok(())
}

fn write_process_memory_graphs<W: Write>(
    w: &mut W,
    rounds: &[Snapshot],
    data: &ReportData,
    config: &Config,
) -> io::Result<()> {
    if config.report.show_all_processes {
        writeln!(w, "<p>All processes are listed (significance filter disabled).")?;
    } else {
        writeln!(
            w,
            "<p>Only processes whose memory usage trend is significant across \
             the test rounds are listed. Secondary threads are ignored."
        )?;
    }
    if data.trends.is_empty() {
        writeln!(w, "<p>No processes to graph.")?;
        return Ok(());
    }

    let largest = data
        .trends
        .iter()
        .flat_map(|trend| trend.samples.iter().flatten())
        .map(|sample| sample.size)
        .max()
        .unwrap_or(1)
        .max(1) as f64;

    for trend in &data.trends {
        writeln!(w, "<h4>{} [{}]</h4>", escape(&trend.name), trend.pid)?;
        let any_dirty = trend
            .samples
            .iter()
            .flatten()
            .any(|sample| sample.dirty_and_swap.is_some());

        write!(
            w,
            "<table><tr><td><i>Test-case:</i></td><td><i>Graph</i></td>\
             <td><i>RSS:</i></td><td><i>Size:</i></td>"
        )?;
        if any_dirty {
            write!(w, "<td><i>Dirty+swap:</i></td>")?;
        }
        writeln!(w, "</tr>")?;

        let mut row_data: Vec<(String, [f64; 2], Vec<String>)> = Vec::new();
        let mut prev_text: Option<Vec<String>> = None;
        let mut span_start = 0usize;
        for (idx, sample) in trend.samples.iter().enumerate() {
            match sample {
                Some(sample) => {
                    let mut texts = vec![format!("{}kB", sample.rss), format!("{}kB", sample.size)];
                    if any_dirty {
                        texts.push(match sample.dirty_and_swap {
                            Some(dirty) => format!("{dirty}kB"),
                            None => "N/A".to_string(),
                        });
                    }
                    let anchor = |idx: usize| {
                        if idx == 0 {
                            "#initial-state".to_string()
                        } else {
                            format!("#round-{idx}")
                        }
                    };
                    let case = if idx > 0 && prev_text.as_ref() == Some(&texts) {
                        // identical consecutive rounds share one row
                        row_data.pop();
                        format!(
                            "Rounds <a href=\"{}\">{span_start:02}</a> - \
                             <a href=\"{}\">{idx:02}</a>:",
                            anchor(span_start),
                            anchor(idx)
                        )
                    } else {
                        span_start = idx;
                        if idx == 0 {
                            "<a href=\"#initial-state\">Initial state</a>:".to_string()
                        } else {
                            format!("Test round <a href=\"#round-{idx}\">{idx:02}</a>:")
                        }
                    };
                    let fractions = [
                        sample.rss as f64 / largest,
                        sample.size.saturating_sub(sample.rss) as f64 / largest,
                    ];
                    prev_text = Some(texts.clone());
                    row_data.push((case, fractions, texts));
                }
                None => {
                    if prev_text.is_none() && !row_data.is_empty() {
                        // successive rounds without the process: one row
                        continue;
                    }
                    if row_data.is_empty() {
                        continue;
                    }
                    prev_text = None;
                    row_data.push(("---".to_string(), [0.0, 0.0], vec!["N/A".to_string()]));
                }
            }
        }

        for (case, fractions, texts) in row_data {
            let bar = html::bar(
                &[
                    BarSegment {
                        color: colors::BAR_RSS,
                        fraction: fractions[0],
                    },
                    BarSegment {
                        color: colors::BAR_SIZE,
                        fraction: fractions[1],
                    },
                ],
                config.report.graph_width,
            );
            write!(w, "<tr><td>{case}</td><td>{bar}</td>")?;
            for text in texts {
                write!(w, "<td align=\"right\">{text}</td>")?;
            }
            writeln!(w, "</tr>")?;
        }
        writeln!(w, "</table>")?;
    }
    Ok(())
}

// ------------------- per-round error pages -------------------------

/// Writes the per-round `errors.html` side pages next to the data they
/// describe. Failures here should degrade the run, not abort it; the
/// caller decides.
pub fn write_error_pages(rounds: &[Snapshot], data: &ReportData) -> io::Result<()> {
    if rounds[0].errors.is_some() {
        write_error_page(&rounds[0], None, &data.initial_errors, 0)?;
    }
    for (idx, diff) in data.diffs.iter().enumerate() {
        let round = &rounds[idx + 1];
        if round.errors.is_some() {
            write_error_page(round, Some(&rounds[idx]), &diff.errors, idx + 1)?;
        }
    }
    Ok(())
}

fn error_page_path(round: &Snapshot) -> PathBuf {
    round.basedir.join("errors.html")
}

fn write_error_page(
    round: &Snapshot,
    previous: Option<&Snapshot>,
    errors: &ErrorDiff,
    index: usize,
) -> io::Result<()> {
    let title = if index == 0 {
        "Errors for the initial state".to_string()
    } else {
        format!("Errors for round {index}")
    };
    let mut page = String::new();
    page.push_str(&format!(
        "<html>\n<head><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n"
    ));
    if let Some(previous) = previous {
        if let Some(name) = previous.basedir.file_name() {
            page.push_str(&format!(
                "<a href=\"../{}/errors.html\">Errors for previous round</a>\n",
                escape(&name.to_string_lossy())
            ));
        }
    }
    if errors.is_empty() {
        page.push_str("<p>No new notifiable log items.\n");
    }
    for category in &errors.anomalies {
        page.push_str(&format!(
            "<p><font color=\"red\">Warning: the '{}' list does not extend the \
             previous round's.</font>\n",
            escape(category)
        ));
    }
    for (category, lines) in &errors.new_lines {
        page.push_str(&format!(
            "\n<a name=\"{}\"></a>\n<h4>{}</h4>\n<ul>\n",
            slug(category),
            escape(category)
        ));
        for line in lines {
            page.push_str(&format!("<li>{}</li>\n", escape(line)));
        }
        page.push_str("</ul>\n");
    }
    page.push_str("</body>\n</html>\n");
    fs::write(error_page_path(round), page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Pid, Process};

    fn round(release: &str, free: u64) -> Snapshot {
        let mut snapshot = Snapshot::empty(release, "date 2026-01-01");
        snapshot.mem.ram_total = 256 * 1024;
        snapshot.mem.ram_free = free;
        snapshot
    }

    fn add_process(snapshot: &mut Snapshot, pid: u32, name: &str, vm_size: u64) {
        snapshot.processes.insert(
            Pid(pid),
            Process {
                name: name.to_string(),
                state: "S".to_string(),
                ppid: Pid(1),
                vm_size,
                vm_rss: vm_size / 2,
                threads: 1,
            },
        );
        snapshot.commands.insert(Pid(pid), name.to_string());
    }

    fn render(rounds: &[Snapshot], config: &Config) -> String {
        let data = analyze(rounds, config);
        let mut out = Vec::new();
        write_report(&mut out, rounds, &data, config).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn report_contains_expected_sections() {
        let mut round1 = round("SW 1.0", 130_000);
        add_process(&mut round1, 10, "app", 1000);
        let mut round2 = round("SW 1.0", 120_000);
        add_process(&mut round2, 10, "app", 1000);
        round2.mounts.insert("/".to_string(), 5000);
        round1.mounts.insert("/".to_string(), 4000);

        let report = render(&[round1, round2], &Config::default());
        assert!(report.contains("<a name=\"initial-state\">"));
        assert!(report.contains("<a name=\"round-1\">"));
        assert!(report.contains("Filesystem usage"));
        assert!(report.contains("System free memory change: <b>-10000</b> kB"));
        assert!(report.contains("soakdiff v"));
    }

    #[test]
    fn summary_section_appears_with_three_rounds() {
        let rounds: Vec<Snapshot> = (0..3).map(|_| round("SW 1.0", 130_000)).collect();
        let report = render(&rounds, &Config::default());
        assert!(report.contains("Resource usage summary"));
        assert!(report.contains("summary for automatic parsing"));
        assert!(report.contains("shown only for processes which exist in both"));
    }

    #[test]
    fn release_mismatch_annotation_is_visible() {
        let round1 = round("SW 1.0", 130_000);
        let round2 = round("SW 2.0", 130_000);
        let report = render(&[round1, round2], &Config::default());
        assert!(report.contains("does not match previous round"));
    }

    #[test]
    fn reboot_note_replaces_kernel_rates() {
        use crate::snapshot::{CpuTicks, KernelStats};
        let mut round1 = round("SW 1.0", 130_000);
        let mut round2 = round("SW 1.0", 130_000);
        round1.kernel = Some(KernelStats {
            cpu: CpuTicks {
                user: 1000,
                ..CpuTicks::default()
            },
            ..KernelStats::default()
        });
        round2.kernel = Some(KernelStats {
            cpu: CpuTicks {
                user: 800,
                ..CpuTicks::default()
            },
            ..KernelStats::default()
        });
        let report = render(&[round1, round2], &Config::default());
        assert!(report.contains("Reboot detected"));
        assert!(!report.contains("Kernel events over"));
    }

    #[test]
    fn process_labels_are_escaped() {
        let mut round1 = round("SW 1.0", 130_000);
        let mut round2 = round("SW 1.0", 130_000);
        add_process(&mut round1, 10, "evil<script>", 1000);
        add_process(&mut round2, 10, "evil<script>", 1000);
        round1.fd_counts.insert(Pid(10), 4);
        round2.fd_counts.insert(Pid(10), 9);
        let report = render(&[round1, round2], &Config::default());
        assert!(report.contains("evil&lt;script&gt;"));
        assert!(!report.contains("evil<script>"));
    }

    #[test]
    fn error_counts_table_links_to_side_page() {
        let mut round1 = round("SW 1.0", 130_000);
        let mut round2 = round("SW 1.0", 130_000);
        round1.errors = Some(BTreeMap::new());
        let mut categories = BTreeMap::new();
        categories.insert(
            "Kernel Oopses".to_string(),
            vec!["Oops: 7".to_string(), "Oops: 11".to_string()],
        );
        round2.errors = Some(categories);
        round2.basedir = PathBuf::from("round-2");
        let report = render(&[round1, round2], &Config::default());
        assert!(report.contains("round-2/errors.html#kernel-oopses"));
        assert!(report.contains("Kernel Oopses"));
    }
}
