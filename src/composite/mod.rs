//! Repo-local composite action expansion.
//!
//! The jobs API reports a composite action as a single opaque step; the
//! only trace of its inner actions is the sequence of `##[group]` blocks
//! in the job's raw log. This module recovers that structure:
//! detection of composite references in step and block names, matching
//! of header blocks to API steps by time and naming heuristics, and the
//! per-run registry that rendering looks expansions up in.
//!
//! Extraction of the inner steps themselves lives in [`extract`].

pub mod extract;

use chrono::{DateTime, Utc};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::github::{Job, Step};
use crate::log_parser::{LogBlock, parse_log_blocks};
use extract::{extract_inner_steps, filter_nested_composite_blocks};

/// Marker the runner prefixes to executed step groups.
pub const RUN_PREFIX: &str = "Run ";

/// Matching tolerance between a block's millisecond-precision start and
/// a step's whole-second API start.
const MATCH_TOLERANCE_MS: i64 = 2000;

// Repo-local composite reference, e.g. "Run ./.github/actions/setup".
// Some API responses carry an extra leading separator
// ("Run /./.github/actions/setup"); both spellings are accepted.
static REPO_LOCAL_COMPOSITE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Run /?\./\.github/actions/").unwrap());

static COMPOSITE_PREFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Run /?\./").unwrap());

/// Whether a step or block name references a repo-local composite action.
pub fn is_repo_local_composite(name: &str) -> bool {
    REPO_LOCAL_COMPOSITE_REGEX.is_match(name)
}

/// Repository-relative directory of a composite reference,
/// e.g. `.github/actions/setup`. `None` for non-composite names.
pub fn composite_action_dir(name: &str) -> Option<String> {
    if !is_repo_local_composite(name) {
        return None;
    }
    Some(COMPOSITE_PREFIX_REGEX.replace(name, "").into_owned())
}

/// Trailing path segment of a composite reference, used as the display
/// token when matching against custom-renamed steps.
pub fn composite_token_name(name: &str) -> Option<String> {
    let dir = composite_action_dir(name)?;
    dir.rsplit('/').next().map(str::to_string)
}

/// One inner action of an expanded composite.
#[derive(Debug, Clone, PartialEq)]
pub struct InnerStep {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Expansion result for one composite step of one job.
#[derive(Debug, Clone)]
pub struct CompositeActionStep {
    pub parent_step_name: String,
    pub parent_step_number: i64,
    pub inner_steps: Vec<InnerStep>,
}

/// Lookup from (job id, step number) to that step's expansion.
/// Built once per run, read-only afterwards.
#[derive(Debug, Default)]
pub struct CompositeStepRegistry {
    map: HashMap<(i64, i64), CompositeActionStep>,
}

impl CompositeStepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job_id: i64, step_number: i64, composite: CompositeActionStep) {
        self.map.insert((job_id, step_number), composite);
    }

    pub fn get(&self, job_id: i64, step_number: i64) -> Option<&CompositeActionStep> {
        self.map.get(&(job_id, step_number))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Verdict of the action-definition lookup for one composite path.
///
/// `Unknown` is an explicit signal (unreadable definition, or the
/// composite nests another local composite); it disables expansion for
/// every occurrence of the path rather than risking a wrong count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredCount {
    Known(usize),
    Unknown,
}

/// A header block assigned to one step of the job.
#[derive(Debug, Clone)]
pub struct MatchedHeader {
    pub step_index: usize,
    pub block: LogBlock,
}

#[derive(Debug, Clone, Copy)]
struct MatchCandidate {
    step_index: usize,
    delta_ms: i64,
    name_is_composite: bool,
    number: i64,
}

// Total order over match candidates: steps whose own name keeps the
// composite reference rank first (the step was not custom-renamed),
// then smaller time delta, then declaration order.
fn candidate_order(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.name_is_composite
        .cmp(&a.name_is_composite)
        .then(a.delta_ms.cmp(&b.delta_ms))
        .then(a.number.cmp(&b.number))
}

fn normalized_tokens(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn shares_prefix(a: &str, b: &str) -> bool {
    let n = 3.min(a.chars().count()).min(b.chars().count());
    n > 0 && a.chars().take(n).eq(b.chars().take(n))
}

/// Whether every token of the composite's trailing path segment has a
/// counterpart token in the step's display name sharing a 3-character
/// prefix. Catches abbreviations like "vars" for "variables".
fn fuzzy_name_match(reference: &str, step_name: &str) -> bool {
    let ref_tokens = normalized_tokens(reference);
    let step_tokens = normalized_tokens(step_name);
    if ref_tokens.is_empty() || step_tokens.is_empty() {
        return false;
    }
    ref_tokens
        .iter()
        .all(|rt| step_tokens.iter().any(|st| shares_prefix(rt, st)))
}

/// Assign each header block to at most one step of the job.
///
/// Blocks are processed in start order; a consumed step is never offered
/// to a later block. A block with no step within tolerance stays
/// unmatched and its composite is simply not expanded.
pub fn match_header_blocks(steps: &[Step], headers: &[LogBlock]) -> Vec<MatchedHeader> {
    let mut ordered: Vec<&LogBlock> = headers.iter().collect();
    ordered.sort_by_key(|b| b.started_at);

    let mut consumed = vec![false; steps.len()];
    let mut matched = Vec::new();

    for block in ordered {
        let mut candidates: Vec<MatchCandidate> = steps
            .iter()
            .enumerate()
            .filter(|(i, _)| !consumed[*i])
            .filter_map(|(i, step)| {
                let started = step.started_at?;
                let delta_ms = (block.started_at - started).num_milliseconds().abs();
                (delta_ms <= MATCH_TOLERANCE_MS).then_some(MatchCandidate {
                    step_index: i,
                    delta_ms,
                    name_is_composite: is_repo_local_composite(&step.name),
                    number: step.number,
                })
            })
            .collect();

        if candidates.is_empty() {
            continue;
        }
        candidates.sort_by(candidate_order);

        let winner = if candidates[0].name_is_composite {
            candidates[0]
        } else {
            // Custom-renamed step: try the token heuristic, then fall
            // back to positional correspondence (first unconsumed
            // in-tolerance candidate in rank order).
            composite_token_name(&block.name)
                .and_then(|token| {
                    candidates
                        .iter()
                        .find(|c| fuzzy_name_match(&token, &steps[c.step_index].name))
                        .copied()
                })
                .unwrap_or(candidates[0])
        };

        consumed[winner.step_index] = true;
        matched.push(MatchedHeader {
            step_index: winner.step_index,
            block: block.clone(),
        });
    }

    matched
}

/// Build the expansion registry for a whole run.
///
/// `job_logs` maps job id to raw log text; a missing entry degrades that
/// job to no expansion. `declared_counts` carries the definition
/// collaborator's verdict per composite path; a path absent from the map
/// had no definition data at all and falls back to window-bounded
/// extraction.
pub fn build_registry(
    jobs: &[Job],
    job_logs: &HashMap<i64, String>,
    declared_counts: &HashMap<String, DeclaredCount>,
) -> CompositeStepRegistry {
    let mut registry = CompositeStepRegistry::new();

    for job in jobs {
        let Some(log) = job_logs.get(&job.id) else {
            continue;
        };
        let blocks = parse_log_blocks(log);
        if blocks.is_empty() {
            continue;
        }

        let headers: Vec<LogBlock> = blocks
            .iter()
            .filter(|b| is_repo_local_composite(&b.name))
            .cloned()
            .collect();
        let top_level = filter_nested_composite_blocks(&headers);

        for matched in match_header_blocks(&job.steps, &top_level) {
            let step = &job.steps[matched.step_index];
            let Some(action_dir) = composite_action_dir(&matched.block.name) else {
                continue;
            };
            let declared = match declared_counts.get(&action_dir) {
                Some(DeclaredCount::Known(k)) => Some(*k),
                Some(DeclaredCount::Unknown) => {
                    tracing::debug!(
                        job_id = job.id,
                        step = step.number,
                        action = %action_dir,
                        "composite size unknown, leaving step unexpanded"
                    );
                    continue;
                }
                None => None,
            };
            let upper_bound = job
                .steps
                .get(matched.step_index + 1)
                .and_then(|next| next.started_at)
                .or(step.completed_at)
                .or(job.completed_at);

            let inner = extract_inner_steps(&matched.block, &blocks, upper_bound, declared);
            if inner.is_empty() {
                continue;
            }
            registry.insert(
                job.id,
                step.number,
                CompositeActionStep {
                    parent_step_name: step.name.clone(),
                    parent_step_number: step.number,
                    inner_steps: inner,
                },
            );
        }
    }

    registry
}
