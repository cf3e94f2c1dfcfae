//! Formatting helpers for mermaid gantt output.
//!
//! Mermaid has no escaping mechanism for task names, so names are
//! sanitized by removal; durations and offsets are rendered in the two
//! notations the gantt syntax accepts (`1h2m3s` spans and `HH:mm:ss`
//! axis offsets).

use chrono::{DateTime, Utc};

/// Maximum rendered length of a task name before truncation.
pub const MAX_NAME_LENGTH: usize = 80;

/// Whole-second difference between two timestamps.
///
/// Either side missing yields 0, so callers can feed optional API
/// timestamps without pre-checking.
pub fn diff_sec(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> i64 {
    match (start, end) {
        (Some(start), Some(end)) => (end - start).num_seconds(),
        _ => 0,
    }
}

/// Format seconds as a zero-padded `HH:mm:ss` axis offset.
pub fn format_elapsed_time(sec: i64) -> String {
    let hours = sec / 3600;
    let minutes = (sec % 3600) / 60;
    let seconds = sec % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Format seconds compactly: `9s`, `1m30s`, `1h2m3s`.
pub fn format_short_elapsed_time(sec: i64) -> String {
    if sec < 60 {
        format!("{}s", sec)
    } else if sec < 3600 {
        format!("{}m{}s", sec / 60, sec % 60)
    } else {
        format!("{}h{}m{}s", sec / 3600, (sec % 3600) / 60, sec % 60)
    }
}

/// Strip characters that are syntactically significant to mermaid.
pub fn escape_name(name: &str) -> String {
    name.replace([':', ';'], "")
}

/// Truncate a name to `max` characters, appending `...` when cut.
pub fn truncate_name(name: &str, max: usize) -> String {
    if name.chars().count() > max {
        let truncated: String = name.chars().take(max).collect();
        format!("{}...", truncated)
    } else {
        name.to_string()
    }
}
