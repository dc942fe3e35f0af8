mod common;

use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use frame_art_lib::error::LibraryError;
use frame_art_lib::git::{ChangeArea, FileChange, GitRepo, PullOutcome, PushOutcome, SyncEngine, SyncLog, SyncOperation, SyncState};
use frame_art_lib::library::Library;
use frame_art_lib::storage::{FileBackend, MetadataBackend, MetadataStore};
use common::{git, png_upload, Remote};

#[tokio::test]
async fn rename_is_reported_as_one_image_change() {
    let remote = Remote::new();
    let ws = remote.checkout("work");
    let image = ws.publish_image("landscape", &["nature"]).await;
    assert_eq!(ws.sync.local_status().await.unwrap().state, SyncState::Clean);

    let (renamed, changes) = ws.library.rename(&image.filename, "Sunset").await.unwrap();
    let status = ws.sync.local_status().await.unwrap();
    assert_eq!(status.state, SyncState::Dirty);
    assert_eq!(status.summary.image_changes(), 1);
    assert_eq!(status.summary.images_renamed, 1);
    assert!(status.summary.metadata_changed);
    let images = status.changes.iter().filter(|x| x.area == ChangeArea::Image).collect::<Vec<_>>();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].change, FileChange::Renamed {
        from: format!("library/{}", image.filename),
        to: format!("library/{}", renamed.filename),
    });

    let outcome = ws.sync.commit_and_push(changes.files, None).await.unwrap();
    match outcome {
        PushOutcome::Pushed { state, .. } => assert_eq!(state, SyncState::Clean),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let message = ws.git(&["log", "-1", "--format=%B"]);
    assert!(message.starts_with("Frame art: 1 renamed, metadata"), "{message}");
    assert!(message.contains(&format!("renamed library/{} -> library/{}", image.filename, renamed.filename)));
}

#[tokio::test]
async fn commit_includes_only_the_listed_paths() {
    let remote = Remote::new();
    let ws = remote.checkout("work");
    std::fs::write(ws.root.join("notes.txt"), "not part of the library").unwrap();

    let (record, changes) = ws.library.upload(png_upload("forest", &[])).await.unwrap();
    let outcome = ws.sync.commit_and_push(changes.files, None).await.unwrap();
    match outcome {
        PushOutcome::Pushed { files, state, .. } => {
            assert!(files.contains(&format!("library/{}", record.filename)));
            assert!(!files.contains(&"notes.txt".to_string()));
            assert_eq!(state, SyncState::Dirty);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let committed = ws.git(&["show", "--name-only", "--format=", "HEAD"]);
    assert!(!committed.contains("notes.txt"));
    assert!(ws.git(&["status", "--porcelain"]).contains("notes.txt"));
}

#[tokio::test]
async fn pending_changes_are_pushed_in_one_commit() {
    let remote = Remote::new();
    let ws = remote.checkout("work");
    ws.library.upload(png_upload("a", &["nature"])).await.unwrap();
    ws.library.upload(png_upload("b", &[])).await.unwrap();

    let outcome = ws.sync.sync_pending().await.unwrap();
    assert!(matches!(outcome, PushOutcome::Pushed { state: SyncState::Clean, .. }), "{outcome:?}");
    assert_eq!(ws.git(&["log", "-1", "--format=%s"]).trim(), "Frame art: +2 added, metadata");
    assert!(matches!(ws.sync.sync_pending().await.unwrap(), PushOutcome::NothingToCommit));
}

#[tokio::test]
async fn guarded_pull_fast_forwards_when_behind() {
    let remote = Remote::new();
    let a = remote.checkout("a");
    let b = remote.checkout("b");
    let image = a.publish_image("forest", &["nature"]).await;

    let outcome = b.sync.guarded_pull().await.unwrap();
    assert!(matches!(outcome, PullOutcome::Pulled { commits: 1, state: SyncState::Clean }), "{outcome:?}");
    assert_eq!(b.head(), a.head());
    assert_eq!(b.library.get_image(&image.filename).await.unwrap(), image);
    assert!(b.library.library_path(&image.filename).unwrap().is_file());

    let logged = b.sync.recent_log().await.len();
    assert!(matches!(b.sync.guarded_pull().await.unwrap(), PullOutcome::UpToDate));
    assert_eq!(b.sync.recent_log().await.len(), logged);
}

#[tokio::test]
async fn guarded_pull_refuses_while_dirty() {
    let remote = Remote::new();
    let a = remote.checkout("a");
    let b = remote.checkout("b");
    let image = a.publish_image("forest", &[]).await;
    b.library.add_tag("sunset").await.unwrap();
    let before = b.head();

    match b.sync.guarded_pull().await.unwrap() {
        PullOutcome::Refused { state, .. } => assert_eq!(state, SyncState::Dirty),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(b.head(), before);
    assert!(matches!(b.library.get_image(&image.filename).await, Err(LibraryError::NotFound(_))));
    let last = &b.sync.recent_log().await[0];
    assert_eq!(last.operation, SyncOperation::Pull);
    assert!(last.message.starts_with("pull refused"));
}

/// Metadata file that takes its time to be written.
struct SlowBackend {
    inner: FileBackend,
    delay: Duration,
}

#[async_trait]
impl MetadataBackend for SlowBackend {
    fn location(&self) -> PathBuf {
        self.inner.location()
    }

    async fn read(&self) -> frame_art_lib::error::Result<Option<String>> {
        self.inner.read().await
    }

    async fn write(&self, contents: String) -> frame_art_lib::error::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.write(contents).await
    }
}

#[tokio::test]
async fn pull_waits_for_an_in_flight_metadata_write() {
    let remote = Remote::new();
    let a = remote.checkout("a");
    let b = remote.checkout("b");
    let image = a.publish_image("forest", &["nature"]).await;

    let backend = SlowBackend { inner: FileBackend::new(b.config.repo.metadata_path.clone()), delay: Duration::from_millis(800) };
    let repo = GitRepo::new(b.root.clone(), Duration::from_secs(30));
    let library = Library::new(&b.config.repo, MetadataStore::new(backend), repo.clone());
    let sync = SyncEngine::new(repo, b.config.sync_config(), SyncLog::in_memory(10));
    sync.verify().await.unwrap();

    let (tagged, pulled) = tokio::join!(
        library.add_tag("sunset"),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            sync.guarded_pull().await
        },
    );
    tagged.unwrap();
    match pulled.unwrap() {
        PullOutcome::Refused { state, .. } => assert_eq!(state, SyncState::Dirty),
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The local write survived and nothing arrived without its record.
    let doc = library.document().await.unwrap();
    assert!(doc.tags.contains("sunset"));
    assert!(doc.images.is_empty());
    assert!(!library.library_path(&image.filename).unwrap().exists());
}

#[tokio::test]
async fn guarded_pull_refuses_while_ahead_or_diverged() {
    let remote = Remote::new();
    let a = remote.checkout("a");
    let b = remote.checkout("b");
    b.git(&["commit", "--allow-empty", "--quiet", "-m", "local only"]);

    match b.sync.guarded_pull().await.unwrap() {
        PullOutcome::Refused { state, .. } => assert_eq!(state, SyncState::Ahead),
        other => panic!("unexpected outcome: {other:?}"),
    }

    a.publish_image("forest", &[]).await;
    let before = b.head();
    match b.sync.guarded_pull().await.unwrap() {
        PullOutcome::Refused { state, .. } => assert_eq!(state, SyncState::Diverged),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(b.head(), before);
}

#[tokio::test]
async fn rejected_push_is_a_conflict() {
    let remote = Remote::new();
    let a = remote.checkout("a");
    let b = remote.checkout("b");
    a.publish_image("forest", &[]).await;

    let (_, changes) = b.library.upload(png_upload("meadow", &[])).await.unwrap();
    let result = b.sync.commit_and_push(changes.files, None).await;
    assert!(matches!(result, Err(LibraryError::Conflict(_))), "{result:?}");
    assert_eq!(b.sync.state(), SyncState::Conflict);

    let last = &b.sync.recent_log().await[0];
    assert_eq!(last.operation, SyncOperation::Push);
    assert_eq!(last.status, SyncState::Conflict);
    assert_eq!(git(&remote.path(), &["rev-parse", "refs/heads/main"]).trim(), a.head());

    // Never merged automatically.
    match b.sync.guarded_pull().await.unwrap() {
        PullOutcome::Refused { state, .. } => assert_eq!(state, SyncState::Diverged),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn verification_checks_branch_remote_and_lfs() {
    let remote = Remote::new();
    let ws = remote.checkout("work");
    let engine = |edit: &dyn Fn(&mut frame_art_lib::git::SyncConfig)| {
        let mut cfg = ws.config.sync_config();
        edit(&mut cfg);
        SyncEngine::new(GitRepo::new(ws.root.clone(), Duration::from_secs(30)), cfg, SyncLog::in_memory(10))
    };

    let remote_url = remote.path().display().to_string();
    let matching = engine(&|cfg| cfg.expected_remote_url = Some(remote_url.clone()));
    matching.verify().await.unwrap();
    assert_eq!(matching.state(), SyncState::Verified);

    let elsewhere = engine(&|cfg| cfg.expected_remote_url = Some("git@github.com:someone/else.git".to_string()));
    assert!(matches!(elsewhere.verify().await, Err(LibraryError::Configuration(_))));
    assert_eq!(elsewhere.state(), SyncState::Unverified);

    let lfs = engine(&|cfg| cfg.require_lfs = true);
    assert!(matches!(lfs.verify().await, Err(LibraryError::Configuration(_))));

    ws.git(&["checkout", "--quiet", "-b", "feature"]);
    assert!(matches!(ws.sync.verify().await, Err(LibraryError::Configuration(_))));
    assert!(matches!(ws.sync.status().await, Err(LibraryError::Configuration(_))));
}
