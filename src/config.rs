use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Context;
use clap::{ArgAction, Args};
use tracing::info;
use crate::git::{RepoLayout, SyncConfig};
use crate::git::log::DEFAULT_CAPACITY;

#[derive(Args, Debug, Clone)]
pub struct FlatConfig {
    #[arg(long, env = "FRAME_ART_REPO", default_value = ".", help = "Repository root (git work tree)")]
    repo: PathBuf,

    #[arg(long, env = "FRAME_ART_LIBRARY_DIR", default_value = "library", help = "Image directory, relative to the repository")]
    library_dir: String,

    #[arg(long, env = "FRAME_ART_THUMBS_DIR", default_value = "thumbs", help = "Thumbnail directory, relative to the repository")]
    thumbs_dir: String,

    #[arg(long, env = "FRAME_ART_METADATA_FILE", default_value = "metadata.json", help = "Metadata document, relative to the repository")]
    metadata_file: String,

    #[arg(long, env = "FRAME_ART_REMOTE", default_value = "origin", help = "Git remote to sync with")]
    remote: String,

    #[arg(long, env = "FRAME_ART_REMOTE_URL", help = "Expected URL of the remote")]
    expected_remote_url: Option<String>,

    #[arg(long, env = "FRAME_ART_BRANCH", default_value = "main", help = "Branch that must be checked out")]
    branch: String,

    #[arg(long, env = "FRAME_ART_REQUIRE_LFS", default_value_t = true, action = ArgAction::Set, help = "Require git-lfs tracking")]
    require_lfs: bool,

    #[arg(long, env = "FRAME_ART_GIT_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration, help = "Timeout for one git operation")]
    git_timeout: Duration,

    #[arg(long, env = "FRAME_ART_SYNC_LOG", help = "Sync log path [default: .git/frame-art-sync-log.json]")]
    sync_log: Option<PathBuf>,

    #[arg(long, env = "FRAME_ART_SYNC_LOG_SIZE", default_value_t = DEFAULT_CAPACITY, help = "Sync log entries to keep")]
    sync_log_size: usize,

    #[arg(long, env = "FRAME_ART_AUTO_PUSH", default_value_t = false, action = ArgAction::Set, help = "Commit and push after every change")]
    auto_push: bool,

    #[arg(long, env = "FRAME_ART_GIT_USER_NAME", requires = "git_user_email", help = "Commit author name")]
    git_user_name: Option<String>,

    #[arg(long, env = "FRAME_ART_GIT_USER_EMAIL", requires = "git_user_name", help = "Commit author email")]
    git_user_email: Option<String>,

    #[arg(long, env = "FRAME_ART_LISTEN", default_value = "0.0.0.0:8099", help = "HTTP listen address")]
    listen: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub repo: RepoConfiguration,
    pub sync: SyncConfiguration,
    pub api: ApiConfiguration,
}

#[derive(Debug, Clone)]
pub struct RepoConfiguration {
    pub root: PathBuf,
    pub library_dir: PathBuf,
    pub thumbs_dir: PathBuf,
    pub metadata_path: PathBuf,
    pub layout: RepoLayout,
}

#[derive(Debug, Clone)]
pub struct SyncConfiguration {
    pub remote: String,
    pub branch: String,
    pub expected_remote_url: Option<String>,
    pub require_lfs: bool,
    pub git_timeout: Duration,
    pub log_path: PathBuf,
    pub log_size: usize,
    pub auto_push: bool,
    pub identity: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ApiConfiguration {
    pub listen: SocketAddr,
}

impl From<FlatConfig> for Config {
    fn from(value: FlatConfig) -> Self {
        let root = value.repo;
        let layout = RepoLayout {
            library_dir: value.library_dir.trim_matches('/').to_string(),
            thumbs_dir: value.thumbs_dir.trim_matches('/').to_string(),
            metadata_file: value.metadata_file.trim_start_matches('/').to_string(),
        };
        let log_path = value.sync_log.unwrap_or_else(|| root.join(".git").join("frame-art-sync-log.json"));
        Config {
            repo: RepoConfiguration {
                library_dir: root.join(&layout.library_dir),
                thumbs_dir: root.join(&layout.thumbs_dir),
                metadata_path: root.join(&layout.metadata_file),
                root,
                layout,
            },
            sync: SyncConfiguration {
                remote: value.remote,
                branch: value.branch,
                expected_remote_url: value.expected_remote_url,
                require_lfs: value.require_lfs,
                git_timeout: value.git_timeout,
                log_path,
                log_size: value.sync_log_size,
                auto_push: value.auto_push,
                identity: value.git_user_name.zip(value.git_user_email),
            },
            api: ApiConfiguration { listen: value.listen },
        }
    }
}

impl Config {
    /// Layout for a repository rooted at `root` with the default directory names.
    pub fn for_repo(root: &Path) -> Self {
        Config::from(FlatConfig {
            repo: root.to_path_buf(),
            library_dir: "library".to_string(),
            thumbs_dir: "thumbs".to_string(),
            metadata_file: "metadata.json".to_string(),
            remote: "origin".to_string(),
            expected_remote_url: None,
            branch: "main".to_string(),
            require_lfs: true,
            git_timeout: Duration::from_secs(60),
            sync_log: None,
            sync_log_size: DEFAULT_CAPACITY,
            auto_push: false,
            git_user_name: None,
            git_user_email: None,
            listen: SocketAddr::from(([127, 0, 0, 1], 8099)),
        })
    }

    /// Resolves the repository root and creates the library directories.
    pub fn prepare(mut self) -> anyhow::Result<Self> {
        let root = get_or_create_dir(&self.repo.root).context("repository root")?;
        self.repo.library_dir = get_or_create_dir(&root.join(&self.repo.layout.library_dir)).context("library dir")?;
        self.repo.thumbs_dir = get_or_create_dir(&root.join(&self.repo.layout.thumbs_dir)).context("thumbnail dir")?;
        self.repo.metadata_path = root.join(&self.repo.layout.metadata_file);
        if self.repo.metadata_path.exists() && !self.repo.metadata_path.is_file() {
            anyhow::bail!("metadata path {} is not a file", self.repo.metadata_path.display());
        }
        if self.sync.log_path.is_relative() {
            self.sync.log_path = root.join(&self.sync.log_path);
        }
        self.repo.root = root;
        info!("repository: {}", self.repo.root.display());
        info!("library_dir: {}", self.repo.library_dir.display());
        info!("thumbs_dir: {}", self.repo.thumbs_dir.display());
        Ok(self)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            remote: self.sync.remote.clone(),
            branch: self.sync.branch.clone(),
            expected_remote_url: self.sync.expected_remote_url.clone(),
            require_lfs: self.sync.require_lfs,
            layout: self.repo.layout.clone(),
        }
    }
}

fn get_or_create_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    Ok(dir.canonicalize()?)
}
