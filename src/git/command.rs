use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use crate::error::{LibraryError, Result};

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// One working tree. All git processes for it go through [`GitRepo::exclusive`],
/// which holds a single lock for the whole multi-command operation.
#[derive(Clone)]
pub struct GitRepo {
    workdir: PathBuf,
    timeout: Duration,
    identity: Option<(String, String)>,
    lock: Arc<Mutex<()>>,
}

impl GitRepo {
    pub fn new(workdir: PathBuf, timeout: Duration) -> Self {
        Self { workdir, timeout, identity: None, lock: Arc::new(Mutex::new(())) }
    }

    /// Commit author used instead of the repository's own `user.*` config.
    pub fn with_identity(mut self, name: String, email: String) -> Self {
        self.identity = Some((name, email));
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The lock held by [`GitRepo::exclusive`], for other writers of the
    /// working tree to share.
    pub fn worktree_lock(&self) -> Arc<Mutex<()>> {
        self.lock.clone()
    }

    /// Runs `op` with exclusive access to the working tree.
    ///
    /// `op` runs on its own task which owns the lock. If it outlives the
    /// timeout the caller gets `SyncTimeout`, but the task is left to finish:
    /// git transfers are not safe to interrupt, and the lock stays held until
    /// the last git process has exited.
    pub async fn exclusive<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(GitSession) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let timed_out = || LibraryError::SyncTimeout { operation: operation.to_string(), timeout: self.timeout };
        let guard = tokio::time::timeout(self.timeout, self.lock.clone().lock_owned())
            .await
            .map_err(|_| timed_out())?;
        let session = GitSession { workdir: self.workdir.clone(), identity: self.identity.clone() };
        let task = tokio::spawn(async move {
            let _guard = guard;
            op(session).await
        });
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(LibraryError::Git {
                command: operation.to_string(),
                stderr: format!("task failed: {join_error}"),
            }),
            Err(_) => {
                warn!("git {} exceeded {:?}, letting it finish in the background", operation, self.timeout);
                Err(timed_out())
            }
        }
    }
}

/// Handle for issuing git commands while the working tree lock is held.
pub struct GitSession {
    workdir: PathBuf,
    identity: Option<(String, String)>,
}

impl GitSession {
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Runs git and returns its output whatever the exit status.
    pub async fn run(&self, args: &[&str]) -> Result<GitOutput> {
        debug!("git {}", args.join(" "));
        let mut cmd = Command::new("git");
        if let Some((name, email)) = &self.identity {
            cmd.arg("-c").arg(format!("user.name={name}"));
            cmd.arg("-c").arg(format!("user.email={email}"));
        }
        let output = cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| LibraryError::Git { command: command_name(args), stderr: format!("cannot start git: {e}") })?;
        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Runs git and fails with `LibraryError::Git` on a non-zero exit.
    pub async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.success {
            return Err(LibraryError::Git { command: command_name(args), stderr: output.stderr });
        }
        Ok(output.stdout)
    }

    /// `git mv`, recorded by git as a rename rather than a delete plus an add.
    /// Falls back to a plain rename for files git does not track.
    pub async fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        let (from_rel, to_rel) = (self.relative(from), self.relative(to));
        // git would move the file into an existing directory of that name.
        if tokio::fs::symlink_metadata(to).await.is_ok() {
            return Err(LibraryError::conflict(format!("{to_rel} already exists")));
        }
        let output = self.run(&["mv", "-k", "--", from_rel.as_str(), to_rel.as_str()]).await;
        let reason = match output {
            Ok(out) if out.success && !from.exists() && to.exists() => return Ok(()),
            Ok(out) => out.stderr,
            Err(e) => e.to_string(),
        };
        // `-k` skips untracked sources silently, and outside a repository git
        // fails outright; in both cases the file is still where it was.
        debug!("git mv {} -> {} did not apply ({}), renaming directly", from_rel, to_rel, reason);
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.workdir).unwrap_or(path).to_string_lossy().replace('\\', "/")
    }
}

fn command_name(args: &[&str]) -> String {
    args.iter().take_while(|x| !x.starts_with('-')).take(2).cloned().collect::<Vec<_>>().join(" ")
}
