//! Sync state machine for the library's working tree.
//!
//! `Unverified → Verified → {Clean, Dirty, Ahead, Behind, Diverged} → Syncing → {Clean | Conflict}`
//!
//! - Pulls are fast-forward only and refused while there is anything local
//!   that a pull could tangle with (uncommitted changes or unpushed commits).
//! - Commits include only the paths handed in by the caller.
//! - A rejected push is reported as a conflict; nothing is merged or forced.

use std::collections::BTreeSet;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use crate::error::{LibraryError, Result};
use crate::git::command::{GitRepo, GitSession};
use crate::git::log::{SyncLog, SyncLogEntry, SyncOperation};
use crate::git::status::{parse_porcelain, ChangeArea, ChangeSummary, RepoLayout, StatusEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unverified,
    Verified,
    Clean,
    Dirty,
    Ahead,
    Behind,
    Diverged,
    Syncing,
    Conflict,
}

impl SyncState {
    pub fn derive(ahead: usize, behind: usize, dirty: bool, unmerged: bool) -> Self {
        match (ahead > 0, behind > 0) {
            _ if unmerged => Self::Conflict,
            (true, true) => Self::Diverged,
            _ if dirty => Self::Dirty,
            (true, false) => Self::Ahead,
            (false, true) => Self::Behind,
            (false, false) => Self::Clean,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub remote: String,
    pub branch: String,
    /// Upstream identity the remote must point at; unchecked when `None`.
    pub expected_remote_url: Option<String>,
    pub require_lfs: bool,
    pub layout: RepoLayout,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub branch: String,
    pub ahead: usize,
    pub behind: usize,
    pub summary: ChangeSummary,
    pub changes: Vec<StatusEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PullOutcome {
    UpToDate,
    Pulled { commits: usize, state: SyncState },
    Refused { state: SyncState, reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    NothingToCommit,
    Pushed { commit: String, files: Vec<String>, state: SyncState },
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

struct Inner {
    git: GitRepo,
    cfg: SyncConfig,
    state: std::sync::Mutex<SyncState>,
    log: SyncLog,
}

impl Inner {
    fn state(&self) -> SyncState {
        self.state.lock().map(|x| *x).unwrap_or(SyncState::Unverified)
    }

    fn set_state(&self, state: SyncState) -> SyncState {
        match self.state.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, state),
            Err(_) => SyncState::Unverified,
        }
    }
}

impl SyncEngine {
    pub fn new(git: GitRepo, cfg: SyncConfig, log: SyncLog) -> Self {
        Self {
            inner: Arc::new(Inner { git, cfg, state: std::sync::Mutex::new(SyncState::Unverified), log }),
        }
    }

    pub fn state(&self) -> SyncState {
        self.inner.state()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.cfg
    }

    pub async fn recent_log(&self) -> Vec<SyncLogEntry> {
        self.inner.log.recent().await
    }

    /// Checks work tree, remote identity, LFS setup and branch.
    pub async fn verify(&self) -> Result<()> {
        let inner = self.inner.clone();
        let result = self.inner.git.exclusive("verify", move |git| async move {
            verify_repo(&git, &inner.cfg).await
        }).await;
        match &result {
            Ok(()) => {
                info!("repository verified");
                self.inner.set_state(SyncState::Verified);
                self.inner.log.append(SyncOperation::Verify, SyncState::Verified, "repository verified", vec![]).await;
            }
            Err(e) => {
                warn!("repository verification failed: {}", e);
                self.inner.set_state(SyncState::Unverified);
                self.inner.log.append(SyncOperation::Verify, SyncState::Unverified, e.to_string(), vec![]).await;
            }
        }
        result
    }

    async fn ensure_verified(&self) -> Result<()> {
        if self.state() == SyncState::Unverified {
            self.verify().await?;
        }
        Ok(())
    }

    /// Fetches and reports how the working tree relates to the remote.
    pub async fn status(&self) -> Result<SyncStatus> {
        self.ensure_verified().await?;
        let inner = self.inner.clone();
        self.inner.git.exclusive("status", move |git| async move {
            let status = read_status(&git, &inner.cfg, true).await?;
            record_status(&inner, &status).await;
            Ok(status)
        }).await
    }

    /// Status of the working tree against the last fetched remote state,
    /// without touching the network.
    pub async fn local_status(&self) -> Result<SyncStatus> {
        self.ensure_verified().await?;
        let inner = self.inner.clone();
        self.inner.git.exclusive("status", move |git| async move {
            let status = read_status(&git, &inner.cfg, false).await?;
            record_status(&inner, &status).await;
            Ok(status)
        }).await
    }

    /// Fast-forwards to the remote when that is safe, refuses otherwise.
    /// Cheap to call repeatedly: when already clean it only fetches.
    pub async fn guarded_pull(&self) -> Result<PullOutcome> {
        self.ensure_verified().await?;
        let inner = self.inner.clone();
        self.inner.git.exclusive("pull", move |git| async move {
            let status = read_status(&git, &inner.cfg, true).await?;
            match status.state {
                SyncState::Clean => {
                    inner.set_state(SyncState::Clean);
                    Ok(PullOutcome::UpToDate)
                }
                SyncState::Behind => {
                    inner.set_state(SyncState::Syncing);
                    let pulled = git.run_checked(&["pull", "--ff-only", "--quiet", inner.cfg.remote.as_str(), inner.cfg.branch.as_str()]).await;
                    if let Err(e) = pulled {
                        inner.set_state(status.state);
                        inner.log.append(SyncOperation::Pull, status.state, format!("pull failed: {e}"), vec![]).await;
                        return Err(e);
                    }
                    let after = read_status(&git, &inner.cfg, false).await?;
                    inner.set_state(after.state);
                    let message = format!("pulled {} commit(s)", status.behind);
                    info!("{}", message);
                    inner.log.append(SyncOperation::Pull, after.state, message, vec![]).await;
                    Ok(PullOutcome::Pulled { commits: status.behind, state: after.state })
                }
                state => {
                    let reason = refusal_reason(&status);
                    warn!("pull refused: {}", reason);
                    inner.set_state(state);
                    inner.log.append(SyncOperation::Pull, state, format!("pull refused: {reason}"), changed_paths(&status.changes)).await;
                    Ok(PullOutcome::Refused { state, reason })
                }
            }
        }).await
    }

    /// Commits exactly `files` (repository relative) and pushes.
    pub async fn commit_and_push(&self, files: Vec<String>, message: Option<String>) -> Result<PushOutcome> {
        self.ensure_verified().await?;
        let inner = self.inner.clone();
        self.inner.git.exclusive("push", move |git| async move {
            let before = inner.state();
            inner.set_state(SyncState::Syncing);
            let result = commit_and_push_locked(&git, &inner, files, message).await;
            match &result {
                Ok(PushOutcome::NothingToCommit) => {
                    inner.set_state(before);
                }
                Ok(PushOutcome::Pushed { commit, files, state }) => {
                    info!("pushed {} ({} files)", commit, files.len());
                    inner.set_state(*state);
                    inner.log.append(SyncOperation::Push, *state, format!("pushed {commit}"), files.clone()).await;
                }
                Err(LibraryError::Conflict(reason)) => {
                    warn!("push rejected: {}", reason);
                    inner.set_state(SyncState::Conflict);
                    inner.log.append(SyncOperation::Push, SyncState::Conflict, reason.clone(), vec![]).await;
                }
                Err(e) => {
                    inner.set_state(before);
                    inner.log.append(SyncOperation::Push, before, format!("push failed: {e}"), vec![]).await;
                }
            }
            result
        }).await
    }

    /// Commits and pushes every change the classifier currently sees.
    pub async fn sync_pending(&self) -> Result<PushOutcome> {
        let status = self.local_status().await?;
        let files = changed_paths(&status.changes);
        if files.is_empty() && status.ahead == 0 {
            return Ok(PushOutcome::NothingToCommit);
        }
        self.commit_and_push(files, None).await
    }
}

async fn record_status(inner: &Inner, status: &SyncStatus) {
    let previous = inner.set_state(status.state);
    if previous != status.state {
        let message = format!("{} image change(s), {} ahead, {} behind", status.summary.image_changes(), status.ahead, status.behind);
        inner.log.append(SyncOperation::Status, status.state, message, changed_paths(&status.changes)).await;
    }
}

async fn commit_and_push_locked(git: &GitSession, inner: &Inner, files: Vec<String>, message: Option<String>) -> Result<PushOutcome> {
    let cfg = &inner.cfg;
    let requested = files.into_iter().collect::<BTreeSet<String>>();

    // Stage only what exists on disk or in the index; the source side of a
    // `git mv` is already staged and would not match a pathspec any more.
    if !requested.is_empty() {
        let mut ls_args = vec!["ls-files", "-z", "--"];
        ls_args.extend(requested.iter().map(|x| x.as_str()));
        let tracked = git.run_checked(&ls_args).await?;
        let tracked = tracked.split('\0').filter(|x| !x.is_empty()).collect::<BTreeSet<&str>>();
        let stageable = requested.iter()
            .filter(|path| tracked.contains(path.as_str()) || git.workdir().join(path.as_str()).exists())
            .map(|x| x.as_str())
            .collect::<Vec<&str>>();
        if !stageable.is_empty() {
            let mut add_args = vec!["add", "-A", "--"];
            add_args.extend(stageable);
            git.run_checked(&add_args).await?;
        }
    }

    let status = read_status(git, cfg, false).await?;
    let entries = status.changes.iter()
        .filter(|entry| entry.change.paths().iter().any(|path| requested.contains(*path)))
        .cloned()
        .collect::<Vec<StatusEntry>>();
    let commit_paths = changed_paths(&entries);

    if !commit_paths.is_empty() {
        let message = message.unwrap_or_else(|| commit_message(&entries));
        let mut commit_args = vec!["commit", "--quiet", "-m", message.as_str(), "--only", "--"];
        commit_args.extend(commit_paths.iter().map(|x| x.as_str()));
        git.run_checked(&commit_args).await?;
    } else if status.ahead == 0 {
        return Ok(PushOutcome::NothingToCommit);
    }

    let refspec = format!("HEAD:{}", cfg.branch);
    let pushed = git.run(&["push", "--quiet", cfg.remote.as_str(), refspec.as_str()]).await?;
    if !pushed.success {
        if is_push_rejection(&pushed.stderr) {
            return Err(LibraryError::conflict(format!(
                "remote {} has commits that are not local; resolve manually before pushing", cfg.branch
            )));
        }
        return Err(LibraryError::Git { command: "push".to_string(), stderr: pushed.stderr });
    }
    refresh_tracking_ref(git, cfg).await;

    let commit = git.run_checked(&["rev-parse", "--short", "HEAD"]).await?.trim().to_string();
    let after = read_status(git, cfg, false).await?;
    Ok(PushOutcome::Pushed { commit, files: commit_paths, state: after.state })
}

/// Keeps the remote tracking ref current so ahead/behind stay accurate.
/// Best effort: the push itself already succeeded.
async fn refresh_tracking_ref(git: &GitSession, cfg: &SyncConfig) -> bool {
    match git.run(&["fetch", "--quiet", cfg.remote.as_str(), cfg.branch.as_str()]).await {
        Ok(out) if out.success => true,
        Ok(out) => {
            warn!("cannot refresh {}/{} after push: {}", cfg.remote, cfg.branch, out.stderr);
            false
        }
        Err(e) => {
            warn!("cannot refresh {}/{} after push: {}", cfg.remote, cfg.branch, e);
            false
        }
    }
}

fn is_push_rejection(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("[rejected]") || stderr.contains("non-fast-forward") || stderr.contains("fetch first")
}

async fn verify_repo(git: &GitSession, cfg: &SyncConfig) -> Result<()> {
    let inside = git.run(&["rev-parse", "--is-inside-work-tree"]).await?;
    if !inside.success || inside.stdout.trim() != "true" {
        return Err(LibraryError::Configuration(format!("{} is not a git work tree", git.workdir().display())));
    }

    let url = git.run(&["remote", "get-url", cfg.remote.as_str()]).await?;
    if !url.success {
        return Err(LibraryError::Configuration(format!("remote '{}' is not configured", cfg.remote)));
    }
    if let Some(expected) = &cfg.expected_remote_url {
        let actual = url.stdout.trim();
        if normalize_remote_url(actual) != normalize_remote_url(expected) {
            return Err(LibraryError::Configuration(format!(
                "remote '{}' points at {}, expected {}", cfg.remote, actual, expected
            )));
        }
    }

    if cfg.require_lfs {
        let lfs = git.run(&["lfs", "version"]).await?;
        if !lfs.success {
            return Err(LibraryError::Configuration("git-lfs is not installed".to_string()));
        }
        let attributes = tokio::fs::read_to_string(git.workdir().join(".gitattributes")).await.unwrap_or_default();
        if !attributes.lines().any(|line| line.contains("filter=lfs")) {
            return Err(LibraryError::Configuration(".gitattributes has no LFS tracking rules".to_string()));
        }
    }

    let branch = git.run(&["symbolic-ref", "--short", "HEAD"]).await?;
    let branch = branch.stdout.trim();
    if branch != cfg.branch {
        return Err(LibraryError::Configuration(format!(
            "checked out branch is '{}', expected '{}'", branch, cfg.branch
        )));
    }
    Ok(())
}

async fn read_status(git: &GitSession, cfg: &SyncConfig, fetch: bool) -> Result<SyncStatus> {
    if fetch {
        let fetched = git.run(&["fetch", "--quiet", cfg.remote.as_str(), cfg.branch.as_str()]).await?;
        // An empty remote has no branch yet; everything local is simply ahead.
        if !fetched.success && !fetched.stderr.contains("couldn't find remote ref") {
            return Err(LibraryError::Git { command: "fetch".to_string(), stderr: fetched.stderr });
        }
    }
    let porcelain = git.run_checked(&["status", "--porcelain=v1", "-z", "--untracked-files=all"]).await?;
    let changes = parse_porcelain(&porcelain, &cfg.layout);
    let summary = ChangeSummary::of(&changes);
    let (ahead, behind) = ahead_behind(git, cfg).await?;
    let state = SyncState::derive(ahead, behind, !changes.is_empty(), summary.unmerged > 0);
    Ok(SyncStatus { state, branch: cfg.branch.clone(), ahead, behind, summary, changes })
}

async fn ahead_behind(git: &GitSession, cfg: &SyncConfig) -> Result<(usize, usize)> {
    let upstream = format!("refs/remotes/{}/{}", cfg.remote, cfg.branch);
    let has_head = git.run(&["rev-parse", "--verify", "--quiet", "HEAD"]).await?.success;
    let has_upstream = git.run(&["rev-parse", "--verify", "--quiet", upstream.as_str()]).await?.success;
    let count = |out: String| out.trim().parse::<usize>().unwrap_or(0);
    match (has_head, has_upstream) {
        (true, true) => {
            let range = format!("HEAD...{upstream}");
            let counts = git.run_checked(&["rev-list", "--left-right", "--count", range.as_str()]).await?;
            let mut parts = counts.split_whitespace().map(|x| x.parse::<usize>().unwrap_or(0));
            Ok((parts.next().unwrap_or(0), parts.next().unwrap_or(0)))
        }
        (true, false) => Ok((count(git.run_checked(&["rev-list", "--count", "HEAD"]).await?), 0)),
        (false, true) => Ok((0, count(git.run_checked(&["rev-list", "--count", upstream.as_str()]).await?))),
        (false, false) => Ok((0, 0)),
    }
}

fn refusal_reason(status: &SyncStatus) -> String {
    match status.state {
        SyncState::Dirty => format!("{} uncommitted change(s) would be overwritten or tangled by a pull", status.changes.len()),
        SyncState::Ahead => format!("{} local commit(s) not pushed yet", status.ahead),
        SyncState::Diverged => format!("local and remote diverged ({} ahead, {} behind); resolve manually", status.ahead, status.behind),
        SyncState::Conflict => format!("{} unmerged path(s) need manual resolution", status.summary.unmerged),
        other => format!("repository is {:?}", other),
    }
}

/// All paths touched by `changes`, both sides of renames included.
pub fn changed_paths(changes: &[StatusEntry]) -> Vec<String> {
    changes.iter()
        .flat_map(|entry| entry.change.paths())
        .map(|x| x.to_string())
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

const COMMIT_PREFIX: &str = "Frame art:";
const MAX_DETAILED_CHANGES: usize = 5;

/// Generates messages like `Frame art: +1 added, 1 renamed, metadata` with a
/// per-image body when only a few images changed.
pub fn commit_message(entries: &[StatusEntry]) -> String {
    let summary = ChangeSummary::of(entries);
    let mut parts = Vec::new();
    if summary.images_added > 0 {
        parts.push(format!("+{} added", summary.images_added));
    }
    if summary.images_modified > 0 {
        parts.push(format!("~{} modified", summary.images_modified));
    }
    if summary.images_renamed > 0 {
        parts.push(format!("{} renamed", summary.images_renamed));
    }
    if summary.images_deleted > 0 {
        parts.push(format!("-{} deleted", summary.images_deleted));
    }
    if summary.metadata_changed {
        parts.push("metadata".to_string());
    }
    let subject = if parts.is_empty() {
        format!("{COMMIT_PREFIX} update")
    } else {
        format!("{COMMIT_PREFIX} {}", parts.join(", "))
    };

    let images = entries.iter().filter(|x| x.area == ChangeArea::Image).collect::<Vec<_>>();
    if images.is_empty() || images.len() > MAX_DETAILED_CHANGES {
        return subject;
    }
    let body = images.iter()
        .map(|entry| entry.change.to_string())
        .collect::<Vec<String>>()
        .join("\n");
    format!("{subject}\n\n{body}")
}

/// Reduces ssh, https and local forms of a remote to one comparable string.
pub fn normalize_remote_url(url: &str) -> String {
    let mut url = url.trim().trim_end_matches('/').to_lowercase();
    if let Some(stripped) = url.strip_suffix(".git") {
        url = stripped.to_string();
    }
    if let Some((_, rest)) = url.split_once("://") {
        let rest = rest.split_once('@').map(|(_, host)| host).unwrap_or(rest);
        return rest.to_string();
    }
    // scp-like `git@host:owner/repo`
    if let Some((user_host, path)) = url.split_once(':') {
        if !user_host.contains('/') && user_host.len() > 1 {
            let host = user_host.split_once('@').map(|(_, host)| host).unwrap_or(user_host);
            return format!("{host}/{path}");
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use crate::git::status::FileChange;
    use super::*;

    fn entry(change: FileChange, area: ChangeArea) -> StatusEntry {
        StatusEntry { change, area, unmerged: false }
    }

    #[test]
    fn state_derivation() {
        assert_eq!(SyncState::derive(0, 0, false, false), SyncState::Clean);
        assert_eq!(SyncState::derive(0, 0, true, false), SyncState::Dirty);
        assert_eq!(SyncState::derive(2, 0, false, false), SyncState::Ahead);
        assert_eq!(SyncState::derive(0, 3, false, false), SyncState::Behind);
        assert_eq!(SyncState::derive(1, 1, false, false), SyncState::Diverged);
        assert_eq!(SyncState::derive(1, 1, true, false), SyncState::Diverged);
        assert_eq!(SyncState::derive(0, 1, true, false), SyncState::Dirty);
        assert_eq!(SyncState::derive(0, 0, true, true), SyncState::Conflict);
    }

    #[test]
    fn remote_urls_compare_across_protocols() {
        let expected = normalize_remote_url("https://github.com/Owner/frame-art.git");
        assert_eq!(normalize_remote_url("git@github.com:owner/frame-art.git"), expected);
        assert_eq!(normalize_remote_url("ssh://git@github.com/owner/frame-art"), expected);
        assert_eq!(normalize_remote_url("https://token@github.com/owner/frame-art/"), expected);
        assert_ne!(normalize_remote_url("git@github.com:owner/other.git"), expected);
        assert_eq!(normalize_remote_url("/tmp/remote.git"), "/tmp/remote");
    }

    #[test]
    fn detailed_commit_message_for_small_changes() {
        let entries = vec![
            entry(FileChange::Renamed { from: "library/a-00000000.png".to_string(), to: "library/b-00000000.png".to_string() }, ChangeArea::Image),
            entry(FileChange::Renamed { from: "thumbs/a-00000000.png".to_string(), to: "thumbs/b-00000000.png".to_string() }, ChangeArea::Thumbnail),
            entry(FileChange::Modified { path: "metadata.json".to_string() }, ChangeArea::Metadata),
        ];
        assert_eq!(
            commit_message(&entries),
            "Frame art: 1 renamed, metadata\n\nrenamed library/a-00000000.png -> library/b-00000000.png"
        );
    }

    #[test]
    fn count_only_commit_message_for_large_changes() {
        let entries = (0..6)
            .map(|i| entry(FileChange::Added { path: format!("library/x-0000000{i}.png") }, ChangeArea::Image))
            .collect::<Vec<_>>();
        assert_eq!(commit_message(&entries), "Frame art: +6 added");
        assert_eq!(commit_message(&[]), "Frame art: update");
    }

    #[test]
    fn changed_paths_are_unique_and_include_rename_sources() {
        let entries = vec![
            entry(FileChange::Renamed { from: "library/a-00000000.png".to_string(), to: "library/b-00000000.png".to_string() }, ChangeArea::Image),
            entry(FileChange::Modified { path: "metadata.json".to_string() }, ChangeArea::Metadata),
        ];
        assert_eq!(changed_paths(&entries), vec!["library/a-00000000.png", "library/b-00000000.png", "metadata.json"]);
    }

    #[test]
    fn push_rejections_are_recognized() {
        assert!(is_push_rejection(" ! [rejected]        HEAD -> main (fetch first)"));
        assert!(is_push_rejection("Updates were rejected because the tip of your current branch is behind (non-fast-forward)"));
        assert!(!is_push_rejection("fatal: could not read Username"));
    }

    #[tokio::test]
    async fn failed_tracking_ref_refresh_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = GitRepo::new(dir.path().to_path_buf(), std::time::Duration::from_secs(30));
        let cfg = SyncConfig {
            remote: "origin".to_string(),
            branch: "main".to_string(),
            expected_remote_url: None,
            require_lfs: false,
            layout: RepoLayout {
                library_dir: "library".to_string(),
                thumbs_dir: "thumbs".to_string(),
                metadata_file: "metadata.json".to_string(),
            },
        };
        let refreshed = repo.exclusive("fetch", move |git| async move {
            Ok(refresh_tracking_ref(&git, &cfg).await)
        }).await.unwrap();
        assert!(!refreshed);
    }

    #[test]
    fn refusal_reasons_name_the_blocker() {
        let status = SyncStatus {
            state: SyncState::Ahead,
            branch: "main".to_string(),
            ahead: 2,
            behind: 0,
            summary: ChangeSummary::default(),
            changes: vec![],
        };
        assert_eq!(refusal_reason(&status), "2 local commit(s) not pushed yet");
    }
}
