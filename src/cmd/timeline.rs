//! Timeline rendering for `actions-gantt <url>`.

use anyhow::Result;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use actions_gantt::composite::{self, DeclaredCount};
use actions_gantt::errors::TimelineError;
use actions_gantt::gantt::{GanttOptions, create_mermaid};
use actions_gantt::github::{self, Job, WorkflowRunUrl};
use actions_gantt::log_parser::parse_log_blocks;

/// Fetch a run, expand its composite steps, render the gantt markdown
/// and print it to stdout (or write it to `output`). Progress and
/// degradation notices go to stderr so stdout stays pipeable.
pub async fn cmd_timeline(
    url: &str,
    token: Option<&str>,
    output: Option<&Path>,
    hide_waiting_runner: bool,
    log_only: bool,
) -> Result<()> {
    let run_url = github::parse_workflow_run_url(url)?;
    let token = resolve_token(token)?;
    let api_base = github::api_base_url(&run_url.origin);

    eprintln!(
        "{} run {} from {}/{}",
        console::style("Fetching").dim(),
        run_url.run_id,
        run_url.owner,
        run_url.repo
    );
    let run = github::fetch_workflow_run(
        &token,
        &api_base,
        &run_url.owner,
        &run_url.repo,
        run_url.run_id,
        run_url.run_attempt,
    )
    .await?;
    let jobs = github::fetch_workflow_jobs(
        &token,
        &api_base,
        &run_url.owner,
        &run_url.repo,
        run_url.run_id,
        run_url.run_attempt,
    )
    .await?;
    eprintln!(
        "{} {} job(s)",
        console::style("Inspecting").dim(),
        jobs.len()
    );

    let job_logs = fetch_expansion_logs(&token, &api_base, &run_url, &jobs).await;
    let declared_counts = if log_only {
        HashMap::new()
    } else {
        fetch_declared_counts(&token, &api_base, &run_url, &run.head_sha, &jobs, &job_logs).await
    };
    let registry = composite::build_registry(&jobs, &job_logs, &declared_counts);

    let options = GanttOptions {
        show_waiting_runner: !hide_waiting_runner,
    };
    let markdown = create_mermaid(&run, &jobs, &registry, &options);

    match output {
        Some(path) => {
            std::fs::write(path, &markdown).map_err(|source| TimelineError::OutputWriteFailed {
                path: path.to_path_buf(),
                source,
            })?;
            eprintln!("{} {}", console::style("Wrote").green(), path.display());
        }
        None => println!("{}", markdown),
    }

    Ok(())
}

fn resolve_token(flag: Option<&str>) -> Result<String, TimelineError> {
    match flag {
        Some(t) => Ok(t.to_string()),
        None => std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or(TimelineError::MissingToken),
    }
}

/// Download logs for every job that could hold composite expansions.
/// Composite steps can carry custom display names, so no job can be
/// ruled out by step names alone. A failed download degrades that job
/// to an unexpanded timeline.
async fn fetch_expansion_logs(
    token: &str,
    api_base: &str,
    run_url: &WorkflowRunUrl,
    jobs: &[Job],
) -> HashMap<i64, String> {
    let downloads = jobs
        .iter()
        .filter(|job| !job.steps.is_empty())
        .filter(|job| job.conclusion.as_deref() != Some("skipped"))
        .map(|job| async move {
            let result =
                github::fetch_job_log(token, api_base, &run_url.owner, &run_url.repo, job.id).await;
            (job.id, result)
        });

    let mut logs = HashMap::new();
    for (job_id, result) in join_all(downloads).await {
        match result {
            Ok(text) => {
                logs.insert(job_id, text);
            }
            Err(err) => {
                tracing::warn!(job_id, error = %err, "job log unavailable, expansion skipped");
                eprintln!(
                    "{} log for job {} unavailable, rendering it unexpanded",
                    console::style("⚠").yellow(),
                    job_id
                );
            }
        }
    }
    logs
}

/// Look up the declared step count of every distinct composite path
/// referenced by the run, at the commit the run was built from.
async fn fetch_declared_counts(
    token: &str,
    api_base: &str,
    run_url: &WorkflowRunUrl,
    git_ref: &str,
    jobs: &[Job],
    job_logs: &HashMap<i64, String>,
) -> HashMap<String, DeclaredCount> {
    let mut paths: HashSet<String> = jobs
        .iter()
        .flat_map(|job| &job.steps)
        .filter_map(|step| composite::composite_action_dir(&step.name))
        .collect();
    // Renamed composite steps only reveal their path in the log headers.
    for log in job_logs.values() {
        paths.extend(
            parse_log_blocks(log)
                .iter()
                .filter_map(|block| composite::composite_action_dir(&block.name)),
        );
    }

    let lookups = paths.into_iter().map(|path| async move {
        let count = github::fetch_composite_step_count(
            token,
            api_base,
            &run_url.owner,
            &run_url.repo,
            &path,
            git_ref,
        )
        .await;
        let verdict = match count {
            Some(k) => DeclaredCount::Known(k),
            None => DeclaredCount::Unknown,
        };
        (path, verdict)
    });
    join_all(lookups).await.into_iter().collect()
}
