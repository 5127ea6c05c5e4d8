//! Content-fidelity degradation helpers.
//!
//! Nodes demoted into deeper tiers carry progressively shorter derived
//! text: a ~200-char summary at tier 3, ~100 chars at tier 4. Assembly
//! additionally caps tier-5 renderings at 50 chars. Summaries are plain
//! prefix truncations with a marker — no model calls.

/// Character cap for the tier-3 summary.
pub const SUMMARY_CAP: usize = 200;

/// Character cap for the tier-4 deep compression.
pub const DEEP_CAP: usize = 100;

/// Character cap applied to tier-5 content during assembly.
pub const TRACE_CAP: usize = 50;

/// Marker appended when text was truncated.
pub const TRUNCATION_MARKER: &str = "…";

/// Derive a summary: whitespace-collapsed prefix of `content`, at most
/// `cap` chars including the truncation marker.
pub fn summarize(content: &str, cap: usize) -> String {
    let collapsed: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    cap_chars(&collapsed, cap)
}

/// Truncate `text` to at most `cap` chars, appending the marker when
/// anything was cut. Returns the text unchanged when it already fits.
pub fn cap_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let keep = cap.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_unchanged() {
        assert_eq!(cap_chars("hello", 10), "hello");
        assert_eq!(summarize("hello", 10), "hello");
    }

    #[test]
    fn test_truncation_adds_marker() {
        let long = "a".repeat(300);
        let s = summarize(&long, SUMMARY_CAP);
        assert_eq!(s.chars().count(), SUMMARY_CAP);
        assert!(s.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_whitespace_collapsed() {
        let s = summarize("a\n\n  b\tc", 100);
        assert_eq!(s, "a b c");
    }

    #[test]
    fn test_deep_cap_shorter_than_summary_cap() {
        let long = "word ".repeat(100);
        let summary = summarize(&long, SUMMARY_CAP);
        let deep = cap_chars(&summary, DEEP_CAP);
        assert!(deep.chars().count() <= DEEP_CAP);
        assert!(deep.chars().count() < summary.chars().count());
    }
}
