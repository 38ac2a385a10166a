/// Signed quantity with an explicit sign, as shown in change columns.
pub fn signed(value: i64) -> String {
    format!("{value:+}")
}

/// Per-second rate with one decimal, trailing ".0" trimmed.
pub fn rate(value: f64) -> String {
    let text = format!("{value:.1}");
    match text.strip_suffix(".0") {
        Some(trimmed) => trimmed.to_string(),
        None => text,
    }
}

/// Fraction rendered as a percentage with one decimal.
pub fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}
