//! Raw job-log parsing.
//!
//! Runner logs prefix every line with an ISO-8601 UTC timestamp. Group
//! markers `##[group]<name>` and `##[endgroup]` delimit named spans, and
//! markers nest: an `##[endgroup]` always closes the most recently opened
//! group. Recovery therefore keeps an explicit stack of open groups; a
//! single "current block" cursor would attribute nested close markers to
//! the wrong span.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

const GROUP_MARKER: &str = "##[group]";
const ENDGROUP_MARKER: &str = "##[endgroup]";

// Timestamp prefix: whole-second ISO-8601 with optional fractional part,
// as emitted by the runner (7 fractional digits in practice).
static LOG_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z)\s(.*)$").unwrap()
});

/// A named, closed span recovered from raw log text.
#[derive(Debug, Clone, PartialEq)]
pub struct LogBlock {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Parse raw log text into closed group blocks, in close order.
///
/// Lines without a timestamp prefix are ignored, as are close markers
/// with no open group. Groups still open at end-of-text are dropped.
/// Malformed text never fails; it yields fewer blocks.
pub fn parse_log_blocks(log: &str) -> Vec<LogBlock> {
    let mut open: Vec<(String, DateTime<Utc>)> = Vec::new();
    let mut blocks = Vec::new();

    for line in log.lines() {
        let line = line.trim_end_matches('\r');
        let Some(caps) = LOG_LINE_REGEX.captures(line) else {
            continue;
        };
        let Ok(timestamp) = caps[1].parse::<DateTime<Utc>>() else {
            continue;
        };
        let content = &caps[2];

        if let Some(name) = content.strip_prefix(GROUP_MARKER) {
            open.push((name.to_string(), timestamp));
        } else if content.starts_with(ENDGROUP_MARKER) {
            if let Some((name, started_at)) = open.pop() {
                blocks.push(LogBlock {
                    name,
                    started_at,
                    completed_at: timestamp,
                });
            }
        }
    }

    blocks
}
