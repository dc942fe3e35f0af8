#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use tempfile::TempDir;
use frame_art_lib::config::Config;
use frame_art_lib::entities::{ImageRecord, Matte, PhotoFilter};
use frame_art_lib::git::{GitRepo, SyncEngine, SyncLog};
use frame_art_lib::library::{Library, Upload};

pub const EMPTY_METADATA: &str = "{\n  \"images\": {},\n  \"tvs\": [],\n  \"tags\": []\n}";

/// Runs git in `dir` and returns stdout, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// A bare remote on `main` holding one commit with an empty library.
pub struct Remote {
    dir: TempDir,
}

impl Remote {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let remote = dir.path().join("remote.git");
        git(dir.path(), &["init", "--bare", "--quiet", "remote.git"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let seed = dir.path().join("seed");
        git(dir.path(), &["init", "--quiet", "seed"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        configure_identity(&seed);
        std::fs::write(seed.join("metadata.json"), EMPTY_METADATA).unwrap();
        std::fs::create_dir_all(seed.join("library")).unwrap();
        std::fs::write(seed.join("library").join(".gitkeep"), "").unwrap();
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "--quiet", "-m", "Initial library"]);
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
        git(&seed, &["push", "--quiet", "origin", "main"]);
        Self { dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("remote.git")
    }

    pub fn checkout(&self, name: &str) -> Workspace {
        git(self.dir.path(), &["clone", "--quiet", "remote.git", name]);
        let root = self.dir.path().join(name);
        configure_identity(&root);
        Workspace::open(root)
    }
}

/// One working tree with its coordinator and sync engine sharing a git lock.
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub library: Library,
    pub sync: SyncEngine,
}

impl Workspace {
    pub fn open(root: PathBuf) -> Self {
        let mut config = Config::for_repo(&root);
        config.sync.require_lfs = false;
        let config = config.prepare().expect("failed to prepare config");
        let repo = GitRepo::new(config.repo.root.clone(), Duration::from_secs(30));
        let sync = SyncEngine::new(repo.clone(), config.sync_config(), SyncLog::in_memory(100));
        let library = Library::open(&config.repo, repo);
        Self { root: config.repo.root.clone(), config, library, sync }
    }

    pub fn git(&self, args: &[&str]) -> String {
        git(&self.root, args)
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Uploads a small PNG and commits and pushes it.
    pub async fn publish_image(&self, name: &str, tags: &[&str]) -> ImageRecord {
        let (record, changes) = self.library.upload(png_upload(name, tags)).await.expect("upload failed");
        self.sync.commit_and_push(changes.files, None).await.expect("push failed");
        record
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 64u8]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn png_upload(name: &str, tags: &[&str]) -> Upload {
    Upload {
        bytes: png_bytes(32, 24),
        original_filename: "upload.png".to_string(),
        name: name.to_string(),
        matte: Matte::None,
        filter: PhotoFilter::None,
        tags: tags.iter().map(|x| x.to_string()).collect(),
    }
}
