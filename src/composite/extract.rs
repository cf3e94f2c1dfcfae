//! Inner-step extraction from a job's log blocks.
//!
//! Given a matched composite header, pick the log blocks that belong to
//! the composite's own steps and assign them corrected end times. Log
//! groups close lazily (a group's `##[endgroup]` can trail into the next
//! step's output), so a block's recorded end is not trusted: each inner
//! step ends where the next one starts, and the last one ends at the
//! parent's upper time bound.

use chrono::{DateTime, Utc};

use super::{InnerStep, RUN_PREFIX, is_repo_local_composite};
use crate::log_parser::LogBlock;

/// Drop headers that start inside another header's span, keeping only
/// top-level composites. A block starting exactly at the previous
/// accepted block's end is a sibling, not a nested invocation.
pub fn filter_nested_composite_blocks(headers: &[LogBlock]) -> Vec<LogBlock> {
    let mut sorted: Vec<LogBlock> = headers.to_vec();
    sorted.sort_by_key(|b| b.started_at);

    let mut bound: Option<DateTime<Utc>> = None;
    let mut top_level = Vec::new();
    for block in sorted {
        if bound.is_some_and(|b| block.started_at < b) {
            continue;
        }
        bound = Some(block.completed_at);
        top_level.push(block);
    }
    top_level
}

// Action invocations carry an owner/action namespace ("actions/cache@v4",
// "Run denoland/setup-deno@v2"). Plain shell groups and user-defined
// groups do not, and are not steps of the composite.
fn is_action_invocation(name: &str) -> bool {
    name.contains('/')
}

/// Extract the inner steps of one composite from the job's blocks.
///
/// `upper_bound` is the start of the step after the composite (`None`
/// means the composite runs to the end of the job). With a declared
/// count the extraction stops after that many primary `Run `-prefixed
/// invocations, carrying along auxiliary blocks in between; without one
/// it takes every qualifying block inside the window.
pub fn extract_inner_steps(
    header: &LogBlock,
    blocks: &[LogBlock],
    upper_bound: Option<DateTime<Utc>>,
    declared_count: Option<usize>,
) -> Vec<InnerStep> {
    if declared_count == Some(0) {
        return Vec::new();
    }

    let mut candidates: Vec<&LogBlock> = blocks
        .iter()
        .filter(|b| b.started_at > header.started_at)
        .filter(|b| upper_bound.is_none_or(|bound| b.started_at < bound))
        .filter(|b| !is_repo_local_composite(&b.name))
        .filter(|b| is_action_invocation(&b.name))
        .collect();
    candidates.sort_by_key(|b| b.started_at);

    let mut taken: Vec<&LogBlock> = Vec::new();
    let mut primaries = 0usize;
    for block in candidates {
        let is_primary = block.name.starts_with(RUN_PREFIX);
        if is_primary && declared_count.is_some_and(|k| primaries >= k) {
            break;
        }
        taken.push(block);
        if is_primary {
            primaries += 1;
        }
    }

    let last = taken.len().saturating_sub(1);
    taken
        .iter()
        .enumerate()
        .map(|(i, block)| {
            // The bound comes from whole-second API timestamps and can
            // collide with the block's millisecond start; never let the
            // step end before it begins.
            let completed_at = if i < last {
                taken[i + 1].started_at
            } else {
                upper_bound
                    .unwrap_or(block.completed_at)
                    .max(block.started_at)
            };
            InnerStep {
                name: block
                    .name
                    .strip_prefix(RUN_PREFIX)
                    .unwrap_or(block.name.as_str())
                    .to_string(),
                started_at: block.started_at,
                completed_at,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn block(name: &str, started: &str, completed: &str) -> LogBlock {
        LogBlock {
            name: name.to_string(),
            started_at: ts(started),
            completed_at: ts(completed),
        }
    }

    // ── filter_nested_composite_blocks ───────────────────────────────

    #[test]
    fn test_nested_header_is_dropped() {
        let headers = vec![
            block(
                "Run ./.github/actions/outer",
                "2024-02-06T08:00:00Z",
                "2024-02-06T08:00:20Z",
            ),
            block(
                "Run ./.github/actions/inner",
                "2024-02-06T08:00:05Z",
                "2024-02-06T08:00:15Z",
            ),
        ];
        let kept = filter_nested_composite_blocks(&headers);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Run ./.github/actions/outer");
    }

    #[test]
    fn test_doubly_nested_headers_are_dropped() {
        let headers = vec![
            block(
                "Run ./.github/actions/outer",
                "2024-02-06T08:00:00Z",
                "2024-02-06T08:00:30Z",
            ),
            block(
                "Run ./.github/actions/middle",
                "2024-02-06T08:00:05Z",
                "2024-02-06T08:00:25Z",
            ),
            block(
                "Run ./.github/actions/innermost",
                "2024-02-06T08:00:10Z",
                "2024-02-06T08:00:20Z",
            ),
        ];
        let kept = filter_nested_composite_blocks(&headers);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Run ./.github/actions/outer");
    }

    #[test]
    fn test_disjoint_headers_are_both_kept() {
        let headers = vec![
            block(
                "Run ./.github/actions/first",
                "2024-02-06T08:00:00Z",
                "2024-02-06T08:00:10Z",
            ),
            block(
                "Run ./.github/actions/second",
                "2024-02-06T08:00:12Z",
                "2024-02-06T08:00:20Z",
            ),
        ];
        assert_eq!(filter_nested_composite_blocks(&headers).len(), 2);
    }

    #[test]
    fn test_header_starting_at_previous_end_is_kept() {
        let headers = vec![
            block(
                "Run ./.github/actions/first",
                "2024-02-06T08:00:00Z",
                "2024-02-06T08:00:10Z",
            ),
            block(
                "Run ./.github/actions/second",
                "2024-02-06T08:00:10Z",
                "2024-02-06T08:00:20Z",
            ),
        ];
        assert_eq!(filter_nested_composite_blocks(&headers).len(), 2);
    }

    #[test]
    fn test_unsorted_input_is_handled() {
        let headers = vec![
            block(
                "Run ./.github/actions/inner",
                "2024-02-06T08:00:05Z",
                "2024-02-06T08:00:15Z",
            ),
            block(
                "Run ./.github/actions/outer",
                "2024-02-06T08:00:00Z",
                "2024-02-06T08:00:20Z",
            ),
        ];
        let kept = filter_nested_composite_blocks(&headers);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Run ./.github/actions/outer");
    }

    #[test]
    fn test_no_headers_yields_empty() {
        assert!(filter_nested_composite_blocks(&[]).is_empty());
    }

    // ── extract_inner_steps: candidate selection ─────────────────────

    fn header() -> LogBlock {
        block(
            "Run ./.github/actions/setup",
            "2024-02-06T08:00:01.000Z",
            "2024-02-06T08:00:01.200Z",
        )
    }

    #[test]
    fn test_extracts_window_blocks_without_count() {
        let blocks = vec![
            header(),
            block(
                "Run actions/checkout@v4",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:04.900Z",
            ),
            block(
                "Run actions/setup-node@v4",
                "2024-02-06T08:00:05.000Z",
                "2024-02-06T08:00:09.800Z",
            ),
            block(
                "Run cargo test",
                "2024-02-06T08:00:10.500Z",
                "2024-02-06T08:00:30.000Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:10Z")), None);
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0].name, "actions/checkout@v4");
        assert_eq!(inner[1].name, "actions/setup-node@v4");
    }

    #[test]
    fn test_blocks_before_header_are_excluded() {
        let blocks = vec![
            block(
                "Run actions/checkout@v4",
                "2024-02-06T08:00:00.000Z",
                "2024-02-06T08:00:00.900Z",
            ),
            header(),
            block(
                "Run actions/cache@v4",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:04.000Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:10Z")), None);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].name, "actions/cache@v4");
    }

    #[test]
    fn test_other_composite_headers_are_excluded() {
        let blocks = vec![
            header(),
            block(
                "Run ./.github/actions/teardown",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:03.000Z",
            ),
            block(
                "Run actions/cache@v4",
                "2024-02-06T08:00:04.000Z",
                "2024-02-06T08:00:05.000Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:10Z")), None);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].name, "actions/cache@v4");
    }

    #[test]
    fn test_plain_shell_groups_are_excluded() {
        let blocks = vec![
            header(),
            block(
                "Run echo hello",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:02.500Z",
            ),
            block(
                "Build summary",
                "2024-02-06T08:00:03.000Z",
                "2024-02-06T08:00:03.500Z",
            ),
            block(
                "Run denoland/setup-deno@v2",
                "2024-02-06T08:00:04.000Z",
                "2024-02-06T08:00:06.000Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:10Z")), None);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].name, "denoland/setup-deno@v2");
    }

    // ── extract_inner_steps: declared count ──────────────────────────

    #[test]
    fn test_count_stops_before_excess_primary() {
        let blocks = vec![
            header(),
            block(
                "Run actions/checkout@v4",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:04.000Z",
            ),
            block(
                "Run actions/setup-node@v4",
                "2024-02-06T08:00:05.000Z",
                "2024-02-06T08:00:08.000Z",
            ),
            block(
                "Run pnpm/action-setup@v4",
                "2024-02-06T08:00:08.500Z",
                "2024-02-06T08:00:09.500Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:20Z")), Some(2));
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[1].name, "actions/setup-node@v4");
    }

    #[test]
    fn test_count_carries_trailing_auxiliary_blocks() {
        let blocks = vec![
            header(),
            block(
                "Run actions/cache@v4",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:04.000Z",
            ),
            block(
                "Received 512 of 512 (100.0%), 1.2 MBs/sec",
                "2024-02-06T08:00:04.100Z",
                "2024-02-06T08:00:05.000Z",
            ),
            block(
                "actions/cache@v4 outputs",
                "2024-02-06T08:00:05.100Z",
                "2024-02-06T08:00:05.400Z",
            ),
            block(
                "Run actions/setup-go@v5",
                "2024-02-06T08:00:06.000Z",
                "2024-02-06T08:00:08.000Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:20Z")), Some(1));
        assert_eq!(inner.len(), 3);
        assert_eq!(inner[0].name, "actions/cache@v4");
        assert_eq!(inner[1].name, "Received 512 of 512 (100.0%), 1.2 MBs/sec");
        assert_eq!(inner[2].name, "actions/cache@v4 outputs");
    }

    #[test]
    fn test_zero_declared_count_yields_empty() {
        let blocks = vec![
            header(),
            block(
                "Run actions/checkout@v4",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:04.000Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:10Z")), Some(0));
        assert!(inner.is_empty());
    }

    #[test]
    fn test_no_qualifying_blocks_yields_empty() {
        let blocks = vec![header()];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:10Z")), Some(2));
        assert!(inner.is_empty());
    }

    // ── extract_inner_steps: end-time correction ─────────────────────

    #[test]
    fn test_each_inner_step_ends_where_the_next_starts() {
        // Endgroups trail: checkout's recorded end is later than
        // setup-node's start but the corrected end must not be.
        let blocks = vec![
            header(),
            block(
                "Run actions/checkout@v4",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:06.300Z",
            ),
            block(
                "Run actions/setup-node@v4",
                "2024-02-06T08:00:05.000Z",
                "2024-02-06T08:00:09.000Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:10Z")), None);
        assert_eq!(inner[0].completed_at, ts("2024-02-06T08:00:05Z"));
        assert_eq!(inner[1].completed_at, ts("2024-02-06T08:00:10Z"));
    }

    #[test]
    fn test_block_starting_past_bound_is_excluded() {
        // Truncated bound precedes the block's millisecond start, so the
        // block falls outside the window entirely.
        let blocks = vec![
            header(),
            block(
                "Run actions/checkout@v4",
                "2024-02-06T08:00:09.700Z",
                "2024-02-06T08:00:10.400Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:09Z")), None);
        assert!(inner.is_empty());
    }

    #[test]
    fn test_tight_bound_truncates_final_duration() {
        // The bound lands between the last block's start and its recorded
        // close; the corrected end is the bound, not the close.
        let blocks = vec![
            header(),
            block(
                "Run actions/checkout@v4",
                "2024-02-06T08:00:01.700Z",
                "2024-02-06T08:00:02.400Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:01.750Z")), None);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].started_at, ts("2024-02-06T08:00:01.700Z"));
        assert_eq!(inner[0].completed_at, ts("2024-02-06T08:00:01.750Z"));
    }

    #[test]
    fn test_no_bound_keeps_last_recorded_end() {
        let blocks = vec![
            header(),
            block(
                "Run actions/checkout@v4",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:06.000Z",
            ),
        ];
        let inner = extract_inner_steps(&header(), &blocks, None, None);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].completed_at, ts("2024-02-06T08:00:06Z"));
    }

    #[test]
    fn test_unsorted_candidates_are_ordered_by_start() {
        let blocks = vec![
            header(),
            block(
                "Run actions/setup-node@v4",
                "2024-02-06T08:00:05.000Z",
                "2024-02-06T08:00:09.000Z",
            ),
            block(
                "Run actions/checkout@v4",
                "2024-02-06T08:00:02.000Z",
                "2024-02-06T08:00:04.000Z",
            ),
        ];
        let inner =
            extract_inner_steps(&header(), &blocks, Some(ts("2024-02-06T08:00:10Z")), None);
        assert_eq!(inner[0].name, "actions/checkout@v4");
        assert_eq!(inner[1].name, "actions/setup-node@v4");
    }
}
