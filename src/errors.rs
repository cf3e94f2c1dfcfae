//! Typed error hierarchy for the timeline pipeline.
//!
//! One enum covers the failures callers need to match on structurally:
//! URL validation, credentials, per-job log retrieval, and output
//! writing. Everything else flows through `anyhow` context chains and
//! lands in the transparent `Other` variant.

use thiserror::Error;

/// Errors from timeline generation.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("Unrecognized workflow run URL: {url}")]
    InvalidRunUrl { url: String },

    #[error("No GitHub token provided; pass --token or set GITHUB_TOKEN")]
    MissingToken,

    #[error("Log for job {job_id} is unavailable: {source}")]
    LogUnavailable {
        job_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write output file at {path}: {source}")]
    OutputWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
