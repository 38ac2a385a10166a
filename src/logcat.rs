use std::collections::BTreeMap;

use regex::Regex;

use crate::config::{LogRule, LogcatConfig};

/// Turns raw log lines into per-category matched lines. The diff engine
/// only ever sees the resulting map, so tests can swap in a fixed fake.
pub trait LogClassifier {
    fn classify(&self, lines: &[String]) -> BTreeMap<String, Vec<String>>;
}

/// Regex-rule classifier. One line can match several categories; the log
/// sometimes carries two messages on a single line (e.g. around a reboot)
/// and missing one of them is worse than the duplication.
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    max_lines: usize,
}

struct CompiledRule {
    category: String,
    pattern: Regex,
}

impl RuleSet {
    pub fn from_config(config: &LogcatConfig) -> Result<Self, regex::Error> {
        let rules = if config.rules.is_empty() {
            default_rules()
        } else {
            config.rules.clone()
        };
        let rules = rules
            .into_iter()
            .map(|rule| {
                Ok(CompiledRule {
                    category: rule.category,
                    pattern: Regex::new(&rule.pattern)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(RuleSet {
            rules,
            max_lines: config.max_lines_per_category,
        })
    }
}

impl LogClassifier for RuleSet {
    fn classify(&self, lines: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for line in lines {
            for rule in &self.rules {
                if rule.pattern.is_match(line) {
                    let matched = categories.entry(rule.category.clone()).or_default();
                    if matched.len() == self.max_lines {
                        // bound memory on pathological logs, oldest first
                        matched.remove(0);
                    }
                    matched.push(line.clone());
                }
            }
        }
        categories
    }
}

/// Built-in classification rules for the message classes seen on the
/// measured platforms. Kept deliberately loose; a category that matches a
/// few harmless lines is cheaper than one that misses a crash.
pub fn default_rules() -> Vec<LogRule> {
    let rules: &[(&str, &str)] = &[
        ("Kernel Oopses", r"kernel: .* Oops:"),
        (
            "Kernel memory shortage",
            r"kernel: .* (Out of Memory: Kill|lowmem: denying memory)",
        ),
        ("Kernel I/O errors", r"kernel: .* I/O error"),
        ("Device reboots", r" syslogd .* restart"),
        ("SysRq messages", r" SysRq "),
        (
            "Watchdog resets",
            r"(spawning too fast -> reset|exited with RESET)",
        ),
        ("Service crashes", r"exited with signal: \d+"),
        ("Service restarts", r"exited and restarted"),
        ("Service exits", r"exited with return value:"),
        ("Application crashes", r"exited due to signal="),
        ("Glib errors", r"GLIB (CRITICAL|ERROR) \*\*"),
        ("Glib warnings", r"GLIB WARNING \*\*"),
        (
            "Connectivity errors",
            r"(cx3110x ERROR|TX dropped|We haven't got a [A-Z_]+ interrupt from)",
        ),
        ("DSP errors", r"(mbox: Illegal seq bit|omapdsp: poll error)"),
    ];
    rules
        .iter()
        .map(|&(category, pattern)| LogRule {
            category: category.to_string(),
            pattern: pattern.to_string(),
        })
        .collect()
}
