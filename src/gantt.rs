//! Mermaid gantt synthesis.
//!
//! One section per job, one task line per rendered step. Only the first
//! entry of a section carries an absolute position; every later entry
//! chains off its predecessor's id, so a single job's clock drift never
//! shifts the rest of the chain. Documents are split when they would
//! exceed the downstream renderer's character limit.

use crate::composite::CompositeStepRegistry;
use crate::format_util::{
    MAX_NAME_LENGTH, diff_sec, escape_name, format_elapsed_time, format_short_elapsed_time,
    truncate_name,
};
use crate::github::{Job, WorkflowRun};

/// mermaid.js refuses to render source larger than this.
pub const DIAGRAM_MAX_CHAR: usize = 50_000;

/// Task marker for one rendered entry. `Default` renders without a
/// marker token, which mermaid styles as a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Default,
    Active,
    Done,
    Crit,
}

impl StepStatus {
    fn token(self) -> Option<&'static str> {
        match self {
            StepStatus::Default => None,
            StepStatus::Active => Some("active"),
            StepStatus::Done => Some("done"),
            StepStatus::Crit => Some("crit"),
        }
    }
}

fn conclusion_status(conclusion: Option<&str>) -> StepStatus {
    match conclusion {
        Some("success") => StepStatus::Default,
        Some("failure") => StepStatus::Crit,
        Some("cancelled") | Some("skipped") | Some("timed_out") => StepStatus::Done,
        _ => StepStatus::Active,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GanttStep {
    pub name: String,
    pub id: String,
    pub status: StepStatus,
    pub position: String,
    pub sec: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GanttJob {
    pub section: String,
    pub steps: Vec<GanttStep>,
}

#[derive(Debug, Clone, Copy)]
pub struct GanttOptions {
    pub show_waiting_runner: bool,
}

impl Default for GanttOptions {
    fn default() -> Self {
        Self {
            show_waiting_runner: true,
        }
    }
}

fn display_name(name: &str, sec: i64) -> String {
    format!(
        "{} ({})",
        truncate_name(&escape_name(name), MAX_NAME_LENGTH),
        format_short_elapsed_time(sec)
    )
}

pub fn format_step(step: &GanttStep) -> String {
    match step.status.token() {
        None => format!("{} :{}, {}, {}s", step.name, step.id, step.position, step.sec),
        Some(token) => format!(
            "{} :{}, {}, {}, {}s",
            step.name, token, step.id, step.position, step.sec
        ),
    }
}

pub fn format_section(job: &GanttJob) -> String {
    let mut lines = vec![format!("section {}", job.section)];
    lines.extend(job.steps.iter().map(format_step));
    lines.join("\n")
}

/// Build the renderable job list. Jobs concluded as skipped are hidden;
/// steps that never finished have no duration and are dropped. A step
/// present in the registry is replaced by its inner steps, which render
/// with the default marker since per-inner outcomes are not observable.
pub fn create_gantt_jobs(
    run: &WorkflowRun,
    jobs: &[Job],
    registry: &CompositeStepRegistry,
    options: &GanttOptions,
) -> Vec<GanttJob> {
    let run_start = run.start_time();

    jobs.iter()
        .filter(|job| job.conclusion.as_deref() != Some("skipped"))
        .enumerate()
        .map(|(job_index, job)| {
            let mut steps: Vec<GanttStep> = Vec::new();

            if options.show_waiting_runner {
                if let Some(created_at) = job.created_at {
                    let sec = diff_sec(Some(created_at), job.started_at);
                    steps.push(GanttStep {
                        name: display_name("Waiting for a runner", sec),
                        id: format!("job{job_index}-0"),
                        status: StepStatus::Active,
                        position: format_elapsed_time(diff_sec(Some(run_start), Some(created_at))),
                        sec,
                    });
                }
            }

            // Only the chain head gets an absolute offset; it is measured
            // from the run's overall start so every section shares one
            // time origin.
            let chain_position = |steps: &[GanttStep]| match steps.last() {
                Some(prev) => format!("after {}", prev.id),
                None => format_elapsed_time(diff_sec(Some(run_start), job.started_at)),
            };

            for step in job.steps.iter().filter(|s| s.status == "completed") {
                match registry.get(job.id, step.number) {
                    Some(composite) => {
                        for inner in &composite.inner_steps {
                            let sec = diff_sec(Some(inner.started_at), Some(inner.completed_at));
                            let entry = GanttStep {
                                name: display_name(&format!("(sub) {}", inner.name), sec),
                                id: format!("job{job_index}-{}", steps.len()),
                                status: StepStatus::Default,
                                position: chain_position(&steps),
                                sec,
                            };
                            steps.push(entry);
                        }
                    }
                    None => {
                        let sec = diff_sec(step.started_at, step.completed_at);
                        let entry = GanttStep {
                            name: display_name(&step.name, sec),
                            id: format!("job{job_index}-{}", steps.len()),
                            status: conclusion_status(step.conclusion.as_deref()),
                            position: chain_position(&steps),
                            sec,
                        };
                        steps.push(entry);
                    }
                }
            }

            GanttJob {
                section: truncate_name(&escape_name(&job.name), MAX_NAME_LENGTH),
                steps,
            }
        })
        .collect()
}

/// Serialize jobs into documents of at most `max_char` characters.
///
/// Sections are never split internally: a single section larger than
/// the budget still goes out as one oversized document.
pub fn create_gantt_diagrams(title: &str, gantt_jobs: &[GanttJob], max_char: usize) -> Vec<String> {
    let header =
        format!("\n```mermaid\ngantt\ntitle {title}\ndateFormat  HH:mm:ss\naxisFormat  %H:%M:%S\n");
    let footer = "\n```";
    let frame_len = header.len() + footer.len();

    let mut diagrams = Vec::new();
    let mut sections: Vec<String> = Vec::new();
    let mut sections_len = 0usize;

    for job in gantt_jobs {
        let section = format_section(job);
        // sections.len() counts the joining newlines once this section
        // is appended.
        if !sections.is_empty()
            && frame_len + sections_len + sections.len() + section.len() > max_char
        {
            diagrams.push(format!("{header}{}{footer}", sections.join("\n")));
            sections.clear();
            sections_len = 0;
        }
        sections_len += section.len();
        sections.push(section);
    }
    if !sections.is_empty() {
        diagrams.push(format!("{header}{}{footer}", sections.join("\n")));
    }
    diagrams
}

/// Render a complete run to mermaid markdown, splitting oversized output
/// into multiple fenced diagrams.
pub fn create_mermaid(
    run: &WorkflowRun,
    jobs: &[Job],
    registry: &CompositeStepRegistry,
    options: &GanttOptions,
) -> String {
    let title = run.name.clone().unwrap_or_default();
    let gantt_jobs = create_gantt_jobs(run, jobs, registry, options);
    create_gantt_diagrams(&title, &gantt_jobs, DIAGRAM_MAX_CHAR).join("\n")
}
