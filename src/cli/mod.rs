use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};
use crate::api::{self, ApiContext};
use crate::config::{Config, FlatConfig};
use crate::git::sync::changed_paths;
use crate::git::{GitRepo, PullOutcome, SyncEngine, SyncLog, SyncStatus};
use crate::library::Library;

#[derive(Parser, Debug)]
#[command(
    name = "frame-art-manager",
    version,
    about = "Image library for Frame TVs, kept in sync with a Git LFS repository",
)]
pub struct Cli {
    #[command(flatten)]
    pub config: FlatConfig,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Verify the repository, pull if safe, then serve the HTTP API (default).
    Serve,

    /// Fetch and show how the working tree relates to the remote.
    Status,

    /// Check work tree, remote, LFS and branch.
    Verify,

    /// Fast-forward to the remote when nothing local is pending.
    Pull,

    /// Commit every pending change and push it.
    Push {
        /// Commit message instead of the generated one.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show recent sync attempts, newest first.
    Log {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from(cli.config).prepare()?;
    let git = open_git(&config);
    let log = SyncLog::open(config.sync.log_path.clone(), config.sync.log_size).await;
    let sync = SyncEngine::new(git.clone(), config.sync_config(), log);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, git, sync).await,
        Commands::Status => {
            print_status(&sync.status().await?);
            Ok(())
        }
        Commands::Verify => {
            sync.verify().await?;
            println!("repository verified: {}", config.repo.root.display());
            Ok(())
        }
        Commands::Pull => {
            print_json(&sync.guarded_pull().await?)
        }
        Commands::Push { message } => {
            let status = sync.local_status().await?;
            let files = changed_paths(&status.changes);
            if files.is_empty() && status.ahead == 0 {
                println!("nothing to push");
                return Ok(());
            }
            print_json(&sync.commit_and_push(files, message).await?)
        }
        Commands::Log { limit } => {
            for entry in sync.recent_log().await.into_iter().take(limit) {
                println!(
                    "{} {:<7} {:<10} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_value(entry.operation)?.as_str().unwrap_or_default(),
                    serde_json::to_value(entry.status)?.as_str().unwrap_or_default(),
                    entry.message,
                );
            }
            Ok(())
        }
    }
}

fn open_git(config: &Config) -> GitRepo {
    let git = GitRepo::new(config.repo.root.clone(), config.sync.git_timeout);
    match config.sync.identity.clone() {
        Some((name, email)) => git.with_identity(name, email),
        None => git,
    }
}

/// Startup hook: a repository that fails verification or cannot be pulled
/// is reported, and the server starts anyway.
async fn serve(config: Config, git: GitRepo, sync: SyncEngine) -> anyhow::Result<()> {
    match sync.verify().await {
        Ok(()) => match sync.guarded_pull().await {
            Ok(PullOutcome::UpToDate) => info!("library is up to date"),
            Ok(PullOutcome::Pulled { commits, .. }) => info!("pulled {} commit(s) at startup", commits),
            Ok(PullOutcome::Refused { reason, .. }) => warn!("startup pull skipped: {}", reason),
            Err(e) => warn!("startup pull failed: {}", e),
        },
        Err(e) => warn!("serving an unverified repository: {}", e),
    }
    let library = Library::open(&config.repo, git);
    api::serve(ApiContext::new(config, library, sync)).await
}

fn print_status(status: &SyncStatus) {
    println!("branch {}: {:?}, {} ahead, {} behind", status.branch, status.state, status.ahead, status.behind);
    let summary = &status.summary;
    println!(
        "images: +{} ~{} -{} renamed {}; metadata {}; thumbnails {}; other {}",
        summary.images_added, summary.images_modified, summary.images_deleted, summary.images_renamed,
        if summary.metadata_changed { "changed" } else { "clean" }, summary.thumbnails_changed, summary.other_changed,
    );
    for entry in &status.changes {
        println!("  {}{}", if entry.unmerged { "! " } else { "" }, entry.change);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["frame-art-manager", "--repo", "/srv/art"]).unwrap();
        assert!(cli.command.is_none());
        let cli = Cli::try_parse_from(["frame-art-manager", "push", "-m", "Spring rotation"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Push { message: Some(_) })));
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["frame-art-manager", "-vv", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
