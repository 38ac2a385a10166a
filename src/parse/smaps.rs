use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;

use crate::snapshot::{Pid, SmapsRecord};

use super::ParseError;

/// Parses a concatenated smaps capture into per-process totals plus the
/// system-wide private dirty code figure.
///
/// The capture is `head`-style: `==> /proc/<pid>/smaps <==` banners and/or
/// `#Pid: <pid>` comments delimit processes, VMA header lines carry the
/// mapping permissions and path, and the indented `Field: N kB` lines that
/// follow belong to the most recent VMA.
pub fn parse_smaps(path: &Path) -> Result<(BTreeMap<Pid, SmapsRecord>, u64), ParseError> {
    let contents = fs::read_to_string(path).map_err(|err| ParseError::io(path, err))?;
    parse_smaps_str(path, &contents)
}

pub(crate) fn parse_smaps_str(
    path: &Path,
    contents: &str,
) -> Result<(BTreeMap<Pid, SmapsRecord>, u64), ParseError> {
    // address range, permissions, offset, device, inode, mapped path
    let vma_line = Regex::new(r"^[0-9a-f]+-[0-9a-f]+ ([-rwxps]+) [0-9a-f]+ [0-9a-f:]+ \d+ *(.*)$")
        .expect("static pattern compiles");

    let mut records: BTreeMap<Pid, SmapsRecord> = BTreeMap::new();
    let mut private_code = 0u64;
    let mut pid: Option<Pid> = None;
    let mut current = SmapsRecord::default();
    let mut in_code_mapping = false;

    let mut flush = |pid: &mut Option<Pid>, current: &mut SmapsRecord| {
        if let Some(done) = pid.take() {
            if *current != SmapsRecord::default() {
                let record = records.entry(done).or_default();
                record.private_dirty += current.private_dirty;
                record.swap += current.swap;
                record.pss += current.pss;
                record.rss += current.rss;
                record.size += current.size;
            }
        }
        *current = SmapsRecord::default();
    };

    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(banner) = line.strip_prefix("==>") {
            flush(&mut pid, &mut current);
            in_code_mapping = false;
            pid = banner
                .split('/')
                .find_map(|part| part.trim().parse::<Pid>().ok());
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if let Some(id) = comment.trim().strip_prefix("Pid:") {
                flush(&mut pid, &mut current);
                in_code_mapping = false;
                pid = id.trim().parse().ok();
            }
            continue;
        }
        if let Some(captures) = vma_line.captures(line) {
            let perms = &captures[1];
            let mapped = &captures[2];
            // code mapping = executable and file backed
            in_code_mapping = perms.as_bytes().get(2) == Some(&b'x') && mapped.starts_with('/');
            continue;
        }
        // a mapping line the grammar missed would silently skew every
        // total after it; that is format drift, not noise. Addresses are
        // lowercase hex, field names (Size, Anonymous, ...) never are.
        if line
            .as_bytes()
            .first()
            .is_some_and(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(byte))
        {
            return Err(ParseError::format(
                path,
                idx + 1,
                format!("unmatched smaps mapping line '{line}'"),
            ));
        }
        if let Some((field, value)) = line.split_once(':') {
            if pid.is_none() {
                return Err(ParseError::format(
                    path,
                    idx + 1,
                    format!("PID missing for smaps line '{line}'"),
                ));
            }
            let Some(amount) = kb_field(value) else {
                continue;
            };
            match field {
                "Private_Dirty" => {
                    current.private_dirty += amount;
                    if in_code_mapping {
                        private_code += amount;
                    }
                }
                "Swap" => current.swap += amount,
                "Pss" => current.pss += amount,
                "Rss" => current.rss += amount,
                "Size" => current.size += amount,
                _ => {}
            }
        }
    }
    flush(&mut pid, &mut current);
    Ok((records, private_code))
}

fn kb_field(value: &str) -> Option<u64> {
    value.trim().strip_suffix("kB")?.trim().parse().ok()
}
