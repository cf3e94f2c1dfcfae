use anyhow::Context;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use crate::errors::TimelineError;

const GITHUB_ORIGIN: &str = "https://github.com";
const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "actions-gantt";

// Matches run URLs from both github.com and GHES hosts, with an optional
// attempt suffix; trailing path segments (e.g. /job/123) are tolerated.
static RUN_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://[^/]+)/([^/]+)/([^/]+)/actions/runs/(\d+)(?:/attempts/(\d+))?")
        .unwrap()
});

/// Location of one workflow run, parsed from its web URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRunUrl {
    pub origin: String,
    pub owner: String,
    pub repo: String,
    pub run_id: u64,
    pub run_attempt: Option<u64>,
}

/// Parse a workflow run web URL.
///
/// Accepts `https://{host}/{owner}/{repo}/actions/runs/{run_id}` with an
/// optional `/attempts/{n}` suffix. The host may be a GHES instance.
pub fn parse_workflow_run_url(url: &str) -> Result<WorkflowRunUrl, TimelineError> {
    let invalid = || TimelineError::InvalidRunUrl {
        url: url.to_string(),
    };
    let caps = RUN_URL_REGEX.captures(url).ok_or_else(invalid)?;

    let run_id = caps[4].parse::<u64>().map_err(|_| invalid())?;
    let run_attempt = caps
        .get(5)
        .map(|m| m.as_str().parse::<u64>())
        .transpose()
        .map_err(|_| invalid())?;

    Ok(WorkflowRunUrl {
        origin: caps[1].to_string(),
        owner: caps[2].to_string(),
        repo: caps[3].to_string(),
        run_id,
        run_attempt,
    })
}

/// REST API base for a web origin: api.github.com for github.com,
/// `{origin}/api/v3` for GHES.
pub fn api_base_url(origin: &str) -> String {
    if origin == GITHUB_ORIGIN {
        GITHUB_API_BASE.to_string()
    } else {
        format!("{}/api/v3", origin)
    }
}

/// A workflow run (subset of fields we care about).
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub head_sha: String,
}

impl WorkflowRun {
    /// Anchor for absolute offsets on the time axis. Attempt re-runs make
    /// `run_started_at` later than `created_at`, and the jobs of the
    /// attempt are positioned relative to the attempt's start.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.run_started_at.unwrap_or(self.created_at)
    }
}

/// One job of a workflow run (subset of fields).
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
    /// Not reported by older GHES versions.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One step of a job, as reported by the jobs API.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub number: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct JobsPage {
    jobs: Vec<Job>,
}

/// Fetch run metadata, optionally for a specific attempt.
pub async fn fetch_workflow_run(
    token: &str,
    api_base: &str,
    owner: &str,
    repo: &str,
    run_id: u64,
    attempt: Option<u64>,
) -> anyhow::Result<WorkflowRun> {
    let client = reqwest::Client::new();
    let url = match attempt {
        Some(n) => format!(
            "{}/repos/{}/{}/actions/runs/{}/attempts/{}",
            api_base, owner, repo, run_id, n
        ),
        None => format!("{}/repos/{}/{}/actions/runs/{}", api_base, owner, repo, run_id),
    };
    let run = client
        .get(&url)
        .header("Authorization", format!("Bearer {}", token))
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .context("Failed to send workflow run request to GitHub")?
        .error_for_status()
        .context("GitHub workflow run API returned error status")?
        .json::<WorkflowRun>()
        .await
        .context("Failed to parse workflow run response from GitHub")?;
    Ok(run)
}

/// List all jobs of a run in execution order.
/// Paginates through all pages automatically.
pub async fn fetch_workflow_jobs(
    token: &str,
    api_base: &str,
    owner: &str,
    repo: &str,
    run_id: u64,
    attempt: Option<u64>,
) -> anyhow::Result<Vec<Job>> {
    let client = reqwest::Client::new();
    let url = match attempt {
        Some(n) => format!(
            "{}/repos/{}/{}/actions/runs/{}/attempts/{}/jobs",
            api_base, owner, repo, run_id, n
        ),
        None => format!(
            "{}/repos/{}/{}/actions/runs/{}/jobs",
            api_base, owner, repo, run_id
        ),
    };
    let mut all_jobs = Vec::new();
    let mut page = 1u32;

    loop {
        let resp: JobsPage = client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .query(&[("per_page", "100"), ("page", &page.to_string())])
            .send()
            .await
            .context("Failed to send jobs request to GitHub")?
            .error_for_status()
            .context("GitHub jobs API returned error status")?
            .json()
            .await
            .context("Failed to parse jobs response from GitHub")?;

        let count = resp.jobs.len();
        all_jobs.extend(resp.jobs);

        if count < 100 {
            break; // Last page
        }
        page += 1;
    }

    Ok(all_jobs)
}

/// Download one job's raw log text. The API answers with a redirect to
/// blob storage, which the client follows.
pub async fn fetch_job_log(
    token: &str,
    api_base: &str,
    owner: &str,
    repo: &str,
    job_id: i64,
) -> Result<String, TimelineError> {
    fetch_job_log_inner(token, api_base, owner, repo, job_id)
        .await
        .map_err(|source| TimelineError::LogUnavailable { job_id, source })
}

async fn fetch_job_log_inner(
    token: &str,
    api_base: &str,
    owner: &str,
    repo: &str,
    job_id: i64,
) -> anyhow::Result<String> {
    let client = reqwest::Client::new();
    let url = format!(
        "{}/repos/{}/{}/actions/jobs/{}/logs",
        api_base, owner, repo, job_id
    );
    let log = client
        .get(&url)
        .header("Authorization", format!("Bearer {}", token))
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .context("Failed to send job log request to GitHub")?
        .error_for_status()
        .context("GitHub job log API returned error status")?
        .text()
        .await
        .context("Failed to read job log body")?;
    Ok(log)
}

/// Composite action definition (subset of fields).
#[derive(Debug, Deserialize)]
struct ActionDefinition {
    runs: Option<ActionRuns>,
}

#[derive(Debug, Deserialize)]
struct ActionRuns {
    using: Option<String>,
    #[serde(default)]
    steps: Vec<ActionStep>,
}

#[derive(Debug, Deserialize)]
struct ActionStep {
    uses: Option<String>,
}

/// Declared step count of a composite action definition.
///
/// Returns `None` when the count cannot be trusted: the YAML does not
/// parse, `runs.using` is not `composite`, or any step `uses` another
/// repo-local action (its steps would inflate the log without appearing
/// in this definition).
pub fn parse_declared_step_count(yaml_text: &str) -> Option<usize> {
    let def: ActionDefinition = serde_yaml::from_str(yaml_text).ok()?;
    let runs = def.runs?;
    if runs.using.as_deref() != Some("composite") {
        return None;
    }
    let nests_local_action = runs
        .steps
        .iter()
        .any(|step| step.uses.as_deref().is_some_and(|uses| uses.starts_with("./")));
    if nests_local_action {
        return None;
    }
    Some(runs.steps.len())
}

/// Fetch a composite action's declared step count from its definition
/// at `git_ref`, trying `action.yml` then `action.yaml`.
/// `None` means the count is unknown and expansion must not assume one.
pub async fn fetch_composite_step_count(
    token: &str,
    api_base: &str,
    owner: &str,
    repo: &str,
    action_dir: &str,
    git_ref: &str,
) -> Option<usize> {
    for file in ["action.yml", "action.yaml"] {
        let path = format!("{}/{}", action_dir, file);
        match fetch_repo_file(token, api_base, owner, repo, &path, git_ref).await {
            Ok(text) => return parse_declared_step_count(&text),
            Err(err) => {
                tracing::debug!(path = %path, error = %err, "composite definition not readable");
            }
        }
    }
    None
}

async fn fetch_repo_file(
    token: &str,
    api_base: &str,
    owner: &str,
    repo: &str,
    path: &str,
    git_ref: &str,
) -> anyhow::Result<String> {
    let client = reqwest::Client::new();
    let url = format!("{}/repos/{}/{}/contents/{}", api_base, owner, repo, path);
    let text = client
        .get(&url)
        .header("Authorization", format!("Bearer {}", token))
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.raw+json")
        .query(&[("ref", git_ref)])
        .send()
        .await
        .context("Failed to send contents request to GitHub")?
        .error_for_status()
        .context("GitHub contents API returned error status")?
        .text()
        .await
        .context("Failed to read contents response body")?;
    Ok(text)
}
