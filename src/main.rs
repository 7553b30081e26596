use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "autopr")]
#[command(version, about = "Autonomous issue-to-PR worker and review-cycle watcher")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch a PR for review activity, or run the repo-level scheduler
    Watch {
        /// PR number to watch; defaults to the current branch's open PR
        pr: Option<u64>,
        /// Repo mode: discover labeled issues and run a worker per issue
        #[arg(long)]
        repo: bool,
        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,
        /// Maximum concurrent issue workers
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Comma-separated issue labels to process (OR semantics)
        #[arg(long)]
        labels: Option<String>,
        /// Base branch for new issue branches
        #[arg(long)]
        base_branch: Option<String>,
        /// Run agent sessions inside Docker containers
        #[arg(long)]
        docker: bool,
        /// Run a single poll cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Print review activity for a PR
    Reviews {
        /// PR number; defaults to the current branch's open PR
        pr: Option<u64>,
        /// Only the latest review round
        #[arg(long)]
        latest: bool,
        /// Machine-readable JSON output
        #[arg(long)]
        json: bool,
    },
    /// Reply to an inline review comment by id
    Reply {
        #[arg(required_unless_present = "list")]
        comment_id: Option<u64>,
        #[arg(required_unless_present = "list")]
        body: Option<String>,
        /// List inline comments with their ids instead of replying
        #[arg(long)]
        list: bool,
        /// PR number; defaults to the current branch's open PR
        #[arg(long)]
        pr: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Watch {
            pr,
            repo,
            interval,
            max_concurrent,
            labels,
            base_branch,
            docker,
            once,
        } => {
            cmd::cmd_watch(cmd::WatchParams {
                pr,
                repo,
                interval,
                max_concurrent,
                labels,
                base_branch,
                docker,
                once,
            })
            .await?;
        }
        Commands::Reviews { pr, latest, json } => cmd::cmd_reviews(pr, latest, json).await?,
        Commands::Reply {
            comment_id,
            body,
            list,
            pr,
        } => cmd::cmd_reply(comment_id, body, list, pr).await?,
    }
    Ok(())
}
