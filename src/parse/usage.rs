use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::snapshot::{MemCounters, Pid, Process, Snapshot};

use super::ParseError;

/// Signature the collector writes into the first line of `usage.csv`.
/// Anything else means the file layout cannot be trusted.
pub const GENERATOR: &str = "syte-endurance-stats";

/// Parses the per-round usage CSV: identity lines followed by sections
/// located by their header rows. Optional sections (platform low-memory
/// limits, X resources, filesystem usage) may be absent in captures from
/// older collectors.
pub fn parse_usage(path: &Path) -> Result<Snapshot, ParseError> {
    let contents = fs::read_to_string(path).map_err(|err| ParseError::io(path, err))?;
    parse_usage_str(path, &contents)
}

pub(crate) fn parse_usage_str(path: &Path, contents: &str) -> Result<Snapshot, ParseError> {
    let mut cursor = Cursor {
        path,
        lines: contents.lines().collect(),
        pos: 0,
    };

    // format: generator = <generator name> <version>
    let generator = cursor.require_line("generator header")?;
    if generator.split_whitespace().nth(2) != Some(GENERATOR) {
        return Err(ParseError::format(
            path,
            1,
            format!("not generated by '{GENERATOR}'"),
        ));
    }

    cursor.next_line(); // separator
    let release = cursor.require_line("SW-version")?.trim().to_string();
    let datetime = cursor.require_line("date")?.trim().to_string();
    if !release.starts_with("SW") || !datetime.starts_with("date") {
        return Err(ParseError::format(
            path,
            cursor.lineno(),
            "missing 'SW-version' or 'date' fields",
        ));
    }
    let mut snapshot = Snapshot::empty(&release, &datetime);

    let headers = cursor.require_section("MemTotal")?;
    let values = cursor.require_line("meminfo values")?;
    snapshot.mem = parse_meminfo(path, cursor.lineno(), headers, values)?;

    // platform low-memory limits, not present in standard kernels
    if cursor.seek_to("lowmem_").is_some() {
        let fields: Vec<u64> = cursor
            .next_line()
            .map(|line| {
                line.trim()
                    .split(',')
                    .filter_map(|field| field.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        if let [low, high, deny] = fields[..] {
            snapshot.limits.low = low;
            snapshot.limits.high = high;
            snapshot.limits.deny = deny;
        } else {
            tracing::warn!("{}: low-memory limits are missing", path.display());
        }
    }

    cursor.require_section("Allocated FDs")?;
    let line = cursor.require_line("file descriptor counts")?;
    let fds: Vec<u64> = line
        .trim()
        .split(',')
        .filter_map(|field| field.trim().parse().ok())
        .collect();
    let [used, free, max] = fds[..] else {
        return Err(ParseError::format(
            path,
            cursor.lineno(),
            "malformed system FD counts",
        ));
    };
    snapshot.fd_free = max.saturating_sub(used) + free;

    cursor.require_section("PID,FD count,Command")?;
    while let Some(line) = cursor.next_line() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let mut fields = line.splitn(3, ',');
        let entry = match (fields.next(), fields.next(), fields.next()) {
            (Some(pid), Some(fds), Some(command)) => pid
                .trim()
                .parse::<Pid>()
                .ok()
                .zip(fds.trim().parse::<u64>().ok())
                .map(|(pid, fds)| (pid, fds, command)),
            _ => None,
        };
        match entry {
            Some((pid, fds, command)) => {
                snapshot.commands.insert(pid, command.to_string());
                snapshot.fd_counts.insert(pid, fds);
            }
            None => tracing::warn!("{}: malformed FD count row '{line}'", path.display()),
        }
    }

    let headers = cursor.require_section("Name,State")?;
    parse_process_table(&mut cursor, headers, &mut snapshot);

    if let Some(headers) = cursor.seek_to("res-base") {
        parse_xclients(&mut cursor, headers, &mut snapshot);
    }

    if cursor.seek_to("Filesystem").is_some() {
        while let Some(line) = cursor.next_line() {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            let fields: Vec<&str> = line.split(',').collect();
            // Filesystem,1k-blocks,Used,Available,Use%,Mountpoint
            let row = fields
                .get(2)
                .and_then(|used| used.trim().parse::<u64>().ok())
                .zip(fields.get(5..).map(|mount| mount.join(",")));
            match row {
                Some((used, mount)) => {
                    snapshot.mounts.insert(mount, used);
                }
                None => tracing::warn!("{}: malformed df row '{line}'", path.display()),
            }
        }
    }

    Ok(snapshot)
}

struct Cursor<'a> {
    path: &'a Path,
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.lines.get(self.pos).copied();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    /// 1-based number of the last consumed line.
    fn lineno(&self) -> usize {
        self.pos
    }

    fn require_line(&mut self, what: &str) -> Result<&'a str, ParseError> {
        let lineno = self.pos + 1;
        self.next_line().ok_or_else(|| {
            ParseError::format(self.path, lineno, format!("file ends before {what}"))
        })
    }

    /// Advances past the first line starting with `prefix` and returns it,
    /// or leaves the position untouched when no such line follows.
    fn seek_to(&mut self, prefix: &str) -> Option<&'a str> {
        let offset = self.lines[self.pos..]
            .iter()
            .position(|line| line.starts_with(prefix))?;
        self.pos += offset + 1;
        Some(self.lines[self.pos - 1])
    }

    fn require_section(&mut self, prefix: &str) -> Result<&'a str, ParseError> {
        let lineno = self.pos + 1;
        self.seek_to(prefix).ok_or_else(|| {
            ParseError::format(self.path, lineno, format!("section '{prefix}' not found"))
        })
    }
}

/// Strips the " kB" unit most memory cells carry.
fn kb_value(field: &str) -> Option<u64> {
    let field = field.trim();
    let digits = field.strip_suffix(" kB").unwrap_or(field);
    digits.trim().parse().ok()
}

fn parse_meminfo(
    path: &Path,
    lineno: usize,
    headers: &str,
    values: &str,
) -> Result<MemCounters, ParseError> {
    let table: BTreeMap<&str, u64> = headers
        .trim()
        .split(',')
        .zip(values.trim().split(','))
        .filter_map(|(name, value)| kb_value(value).map(|value| (name.trim(), value)))
        .collect();
    let required = |name: &str| {
        table.get(name).copied().ok_or_else(|| {
            ParseError::format(path, lineno, format!("meminfo is missing '{name}'"))
        })
    };
    let total = required("MemTotal")?;
    // free memory includes buffers, page cache and reclaimable slab
    let free = required("MemFree")?
        + required("Buffers")?
        + required("Cached")?
        + table.get("SReclaimable").copied().unwrap_or(0);
    Ok(MemCounters {
        ram_total: total,
        ram_free: free.min(total),
        swap_total: required("SwapTotal")?,
        swap_free: required("SwapFree")?,
    })
}

fn parse_process_table(cursor: &mut Cursor<'_>, header_line: &str, snapshot: &mut Snapshot) {
    let mut fields: Vec<&str> = header_line.trim().split(',').collect();
    if let Some(last) = fields.last_mut() {
        // the collector leaves the status-file ':' on the last header
        if let Some((head, _)) = last.split_once(':') {
            *last = head;
        }
    }
    let column = |name: &str| fields.iter().position(|field| *field == name);
    let (Some(name_idx), Some(pid_idx)) = (column("Name"), column("Pid")) else {
        tracing::warn!("process table header lacks Name/Pid columns, section skipped");
        while let Some(line) = cursor.next_line() {
            if line.trim().is_empty() {
                break;
            }
        }
        return;
    };
    let state_idx = column("State");
    let ppid_idx = column("PPid");
    let vm_size_idx = column("VmSize");
    let vm_rss_idx = column("VmRSS");
    let threads_idx = column("Threads");

    while let Some(line) = cursor.next_line() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let info: Vec<&str> = line.split(',').collect();
        let (Some(pid), Some(name)) = (
            info.get(pid_idx).and_then(|pid| pid.trim().parse().ok()),
            info.get(name_idx),
        ) else {
            tracing::warn!("unparseable process row '{line}'");
            continue;
        };
        if info.len() > fields.len() {
            tracing::warn!("process [{pid}] has extra column(s) in CSV data");
        }
        // kernel threads and zombies don't have all the fields
        let full = (info.len() >= fields.len()).then(|| parse_full_row(&info, ParsedColumns {
            name_idx,
            state_idx,
            ppid_idx,
            vm_size_idx,
            vm_rss_idx,
            threads_idx,
        })).flatten();
        match full {
            Some(process) => {
                snapshot.processes.insert(pid, process);
            }
            None => {
                snapshot.kernel_threads.insert(pid, name.to_string());
            }
        }
    }
}

struct ParsedColumns {
    name_idx: usize,
    state_idx: Option<usize>,
    ppid_idx: Option<usize>,
    vm_size_idx: Option<usize>,
    vm_rss_idx: Option<usize>,
    threads_idx: Option<usize>,
}

fn parse_full_row(info: &[&str], columns: ParsedColumns) -> Option<Process> {
    Some(Process {
        name: info.get(columns.name_idx)?.to_string(),
        state: columns
            .state_idx
            .and_then(|idx| info.get(idx))
            .copied()
            .unwrap_or_default()
            .to_string(),
        ppid: info.get(columns.ppid_idx?)?.trim().parse().ok()?,
        vm_size: kb_value(info.get(columns.vm_size_idx?)?)?,
        vm_rss: kb_value(info.get(columns.vm_rss_idx?)?)?,
        threads: info.get(columns.threads_idx?)?.trim().parse().ok()?,
    })
}

fn parse_xclients(cursor: &mut Cursor<'_>, header_line: &str, snapshot: &mut Snapshot) {
    let fields: Vec<&str> = header_line.trim().split(',').collect();
    let total_idx = fields.iter().position(|field| *field == "Total mem");
    let ident_idx = fields.iter().position(|field| *field == "Identifier");
    let first_mem_idx = fields
        .iter()
        .position(|field| field.ends_with(" mem"))
        .unwrap_or(fields.len());
    let (Some(total_idx), Some(ident_idx)) = (total_idx, ident_idx) else {
        tracing::warn!("unrecognized X resource header, section skipped");
        while let Some(line) = cursor.next_line() {
            if line.trim().is_empty() {
                break;
            }
        }
        return;
    };

    while let Some(line) = cursor.next_line() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let info: Vec<&str> = line.split(',').collect();
        let Some(identifier) = info.get(ident_idx..).map(|rest| rest.join(",")) else {
            continue;
        };
        let bytes = info
            .get(total_idx)
            .and_then(|value| value.trim().strip_suffix('B'))
            .and_then(|value| value.parse::<u64>().ok());
        let Some(bytes) = bytes else {
            tracing::warn!("X resource memory not in bytes: '{line}'");
            continue;
        };
        // only worth tracking for clients holding at least a kilobyte
        if bytes >= 1024 {
            *snapshot.xclient_mem.entry(identifier.clone()).or_insert(0) += bytes / 1024;
        }
        let count: u64 = info[1..first_mem_idx.clamp(1, info.len())]
            .iter()
            .filter_map(|value| value.trim().parse::<u64>().ok())
            .sum();
        *snapshot.xclient_count.entry(identifier).or_insert(0) += count;
    }
}
