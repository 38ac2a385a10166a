use std::collections::BTreeMap;

/// Per-category log changes between two rounds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorDiff {
    /// Lines that appeared since the previous round, per category.
    pub new_lines: BTreeMap<String, Vec<String>>,
    /// Categories whose cumulative list shrank or diverged from its
    /// expected prefix. The captures cannot be trusted for these; the
    /// whole current list is reported as new instead.
    pub anomalies: Vec<String>,
}

impl ErrorDiff {
    pub fn is_empty(&self) -> bool {
        self.new_lines.is_empty() && self.anomalies.is_empty()
    }

    /// New-line count per category, zero-count categories omitted.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.new_lines
            .iter()
            .filter(|(_, lines)| !lines.is_empty())
            .map(|(category, lines)| (category.clone(), lines.len()))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.new_lines.values().map(Vec::len).sum()
    }
}

/// Diffs two rounds' classified log lines under the assumption that the
/// underlying log only grows: each category list must extend the previous
/// round's list in place. A list that shrank or whose ends stopped
/// matching is a capture anomaly (log rotated away, device reflashed,
/// classifier cap hit) and degrades to "everything is new" with a visible
/// annotation, never a failure.
pub fn diff_error_categories(
    errors1: Option<&BTreeMap<String, Vec<String>>>,
    errors2: Option<&BTreeMap<String, Vec<String>>>,
) -> ErrorDiff {
    let mut diff = ErrorDiff::default();
    let Some(errors2) = errors2 else {
        return diff;
    };
    let empty = Vec::new();
    for (category, current) in errors2 {
        let previous = errors1
            .and_then(|errors| errors.get(category))
            .unwrap_or(&empty);
        let mut known = previous.len();
        if known > 0 {
            let diverged = known > current.len()
                || previous[0] != current[0]
                || previous[known - 1] != current[known - 1];
            if diverged {
                tracing::warn!(
                    "'{category}' log list ({known} items) does not extend the previous round's"
                );
                diff.anomalies.push(category.clone());
                known = 0;
            }
        }
        if current.len() > known {
            diff.new_lines
                .insert(category.clone(), current[known..].to_vec());
        }
    }
    diff
}
