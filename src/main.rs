use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "actions-gantt")]
#[command(version, about = "Render a GitHub Actions workflow run as a mermaid gantt chart")]
pub struct Cli {
    /// Workflow run URL. ex: https://github.com/{OWNER}/{REPO}/actions/runs/{RUN_ID}/attempts/{ATTEMPT}
    pub url: String,

    /// GitHub token. ex: $(gh auth token). Falls back to $GITHUB_TOKEN
    #[arg(short, long)]
    pub token: Option<String>,

    /// Write the diagram to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not synthesize "Waiting for a runner" entries
    #[arg(long)]
    pub hide_waiting_runner: bool,

    /// Expand composite actions from logs alone, without consulting
    /// their action.yml definitions
    #[arg(long)]
    pub log_only: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    cmd::cmd_timeline(
        &cli.url,
        cli.token.as_deref(),
        cli.output.as_deref(),
        cli.hide_waiting_runner,
        cli.log_only,
    )
    .await
}
