use std::borrow::Cow;

/// Background tints for the different table families, and the bar graph
/// palette. Plain 90s HTML on purpose: the report must survive being
/// mailed around or attached to a bug tracker, where stylesheets and
/// images get stripped.
pub mod colors {
    pub const ERRORS: &str = "FDEEEE";
    pub const DISK: &str = "EEFDFD";
    pub const MEMORY: &str = "EEEEFD";
    pub const THREADS: &str = "CFEFEF";
    pub const XRES: &str = "FDEEFD";
    pub const FDS: &str = "FDFDEE";

    // memory overview bar: used, free, OOM headroom
    pub const BAR_USED: &str = "3149BD";
    pub const BAR_FREE: &str = "ADE739";
    pub const BAR_DENY: &str = "DE2821";
    // per-process bar: resident, rest of virtual size
    pub const BAR_RSS: &str = "DE2821";
    pub const BAR_SIZE: &str = "EAB040";
}

pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    Cow::Owned(escaped)
}

/// Anchor-safe slug for a category heading.
pub fn slug(text: &str) -> String {
    text.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// One colored segment of a horizontal bar; fraction of the full width.
#[derive(Clone, Copy, Debug)]
pub struct BarSegment {
    pub color: &'static str,
    pub fraction: f64,
}

/// A bar graph as a borderless single-row table, so it renders everywhere.
pub fn bar(segments: &[BarSegment], width: u32) -> String {
    let mut out = String::from("<table border=0 cellpadding=0 cellspacing=0><tr>");
    for segment in segments {
        let cell_width = (segment.fraction.clamp(0.0, 1.0) * width as f64).round() as u32;
        out.push_str(&format!(
            "<td bgcolor=\"#{}\" width={cell_width} height=16></td>",
            segment.color
        ));
    }
    out.push_str("</tr></table>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_passes_clean_text_through() {
        assert!(matches!(escape("plain text"), Cow::Borrowed(_)));
    }

    #[test]
    fn escape_replaces_markup() {
        assert_eq!(escape("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn slug_is_anchor_safe() {
        assert_eq!(slug("Kernel Oopses"), "kernel-oopses");
        assert_eq!(slug("I/O errors"), "i-o-errors");
    }

    #[test]
    fn bar_scales_segments() {
        let rendered = bar(
            &[
                BarSegment {
                    color: colors::BAR_USED,
                    fraction: 0.5,
                },
                BarSegment {
                    color: colors::BAR_FREE,
                    fraction: 0.25,
                },
            ],
            100,
        );
        assert!(rendered.contains("width=50"));
        assert!(rendered.contains("width=25"));
    }

    #[test]
    fn bar_clamps_out_of_range_fractions() {
        let rendered = bar(
            &[BarSegment {
                color: colors::BAR_DENY,
                fraction: -0.5,
            }],
            100,
        );
        assert!(rendered.contains("width=0"));
    }
}
