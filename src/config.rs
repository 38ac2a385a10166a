use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub report: ReportConfig,
    pub thresholds: ThresholdsConfig,
    pub logcat: LogcatConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Skip the cross-round significance filter and graph every process.
    pub show_all_processes: bool,
    /// Free-FD levels below which the report warns loudly / quietly.
    pub fd_warn_level: u64,
    pub fd_note_level: u64,
    /// Pixel width of the HTML bar graphs.
    pub graph_width: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            show_all_processes: false,
            fd_warn_level: 200,
            fd_note_level: 500,
            graph_width: 640,
        }
    }
}

/// Empirically tuned significance thresholds. The defaults come from field
/// data; override them per deployment when the noise floor of the platform
/// differs.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// Lifetime CPU share above which a process is a "CPU hogger" and is
    /// always graphed.
    pub cpu_hog_share: f64,
    /// Per-pair CPU share below which a process is folded into the
    /// aggregate footnote instead of getting its own row.
    pub cpu_show_share: f64,
    /// Average per-round relative change in dirty/size that counts as a
    /// trend.
    pub rel_change_per_round: f64,
    /// Absolute dirty+swap range (kB) below which relative change is
    /// treated as noise.
    pub min_dirty_range_kb: u64,
    /// Dirty/RSS floor (kB) for graphing a process seen in a single round.
    pub single_round_floor_kb: u64,
    /// Used-memory percentage that gets OOM emphasis when the platform
    /// reports no low-memory limits of its own.
    pub oom_used_percent: u64,
    /// USER_HZ of the measured device; not recoverable from the captures.
    pub ticks_per_second: u64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        ThresholdsConfig {
            cpu_hog_share: 0.005,
            cpu_show_share: 0.005,
            rel_change_per_round: 0.002,
            min_dirty_range_kb: 16,
            single_round_floor_kb: 1024,
            oom_used_percent: 97,
            ticks_per_second: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogcatConfig {
    /// Upper bound on retained lines per error category; oldest lines are
    /// evicted first on pathological logs.
    pub max_lines_per_category: usize,
    /// Classification rules. Empty means the built-in rule set.
    pub rules: Vec<LogRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogRule {
    pub category: String,
    pub pattern: String,
}

impl Default for LogcatConfig {
    fn default() -> Self {
        LogcatConfig {
            max_lines_per_category: 500,
            rules: Vec::new(),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("soakdiff").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("ignoring unparseable config {}: {err}", path.display());
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert!(!config.report.show_all_processes);
        assert_eq!(config.report.fd_warn_level, 200);
        assert_eq!(config.thresholds.min_dirty_range_kb, 16);
        assert_eq!(config.thresholds.single_round_floor_kb, 1024);
        assert_eq!(config.thresholds.oom_used_percent, 97);
        assert_eq!(config.thresholds.ticks_per_second, 100);
        assert_eq!(config.logcat.max_lines_per_category, 500);
        assert!(config.logcat.rules.is_empty());
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[thresholds]
single_round_floor_kb = 2048
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.thresholds.single_round_floor_kb, 2048);
        // Other fields should be defaults
        assert_eq!(config.thresholds.min_dirty_range_kb, 16);
        assert_eq!(config.report.fd_warn_level, 200);
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
[report]
show_all_processes = true
fd_warn_level = 100
graph_width = 800

[thresholds]
cpu_hog_share = 0.01
rel_change_per_round = 0.005
ticks_per_second = 250

[logcat]
max_lines_per_category = 50
rules = [
    { category = "Kernel Oopses", pattern = "Oops:" },
]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.report.show_all_processes);
        assert_eq!(config.report.fd_warn_level, 100);
        assert_eq!(config.report.graph_width, 800);
        assert!((config.thresholds.cpu_hog_share - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.thresholds.ticks_per_second, 250);
        assert_eq!(config.logcat.max_lines_per_category, 50);
        assert_eq!(config.logcat.rules.len(), 1);
        assert_eq!(config.logcat.rules[0].category, "Kernel Oopses");
    }

    #[test]
    fn missing_file_returns_default() {
        let config = load_config_from_path(Path::new("/nonexistent/path/config.toml"));
        assert_eq!(config.thresholds.min_dirty_range_kb, 16);
    }

    #[test]
    fn invalid_toml_returns_default() {
        let temp = std::env::temp_dir().join("soakdiff_test_invalid.toml");
        std::fs::write(&temp, "this is not valid toml {{{{").unwrap();
        let config = load_config_from_path(&temp);
        assert_eq!(config.thresholds.min_dirty_range_kb, 16);
        let _ = std::fs::remove_file(&temp);
    }
}
