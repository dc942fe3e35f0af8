//! Keeps each image's three artifacts in lockstep: the original under the
//! library directory, its thumbnail, and its record in the metadata document.
//!
//! Every operation leaves the library in a state where each record has its
//! file. Operations that touch more than one artifact hold `op_lock`, and
//! every successful call returns the [`ChangeSet`] to hand to the sync engine.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use crate::config::RepoConfiguration;
use crate::entities::{Filename, ImageRecord, Matte, MetadataDocument, PhotoFilter, Tag};
use crate::error::{LibraryError, Result};
use crate::git::{GitRepo, GitSession, RepoLayout};
use crate::storage::MetadataStore;
use crate::thumbnail::{ImageThumbnailer, Thumbnailer};
use crate::utils::filename::LibraryFilename;
use crate::utils::normalize_tags;

const MAX_SUFFIX_ATTEMPTS: usize = 5;

/// Repository relative paths touched by one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub files: Vec<String>,
    pub description: String,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

pub struct Upload {
    pub bytes: Vec<u8>,
    pub original_filename: String,
    /// Desired base name; sanitized, may be empty.
    pub name: String,
    pub matte: Matte,
    pub filter: PhotoFilter,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageUpdate {
    pub matte: Option<Matte>,
    pub filter: Option<PhotoFilter>,
    /// Replaces the whole tag set.
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMode {
    #[default]
    Any,
    All,
}

#[derive(Debug, Clone, Default)]
pub struct ImageQuery {
    pub tags: Vec<Tag>,
    pub mode: TagMode,
    pub untagged: bool,
}

impl ImageQuery {
    pub fn matches(&self, image: &ImageRecord) -> bool {
        if self.untagged {
            return image.is_untagged();
        }
        if self.tags.is_empty() {
            return true;
        }
        match self.mode {
            TagMode::Any => self.tags.iter().any(|tag| image.tags.contains(tag)),
            TagMode::All => self.tags.iter().all(|tag| image.tags.contains(tag)),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BulkTagFailure {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkTagReport {
    pub updated: Vec<Filename>,
    pub failed: Vec<BulkTagFailure>,
    pub new_tags: Vec<Tag>,
}

pub struct Library {
    store: MetadataStore,
    git: GitRepo,
    layout: RepoLayout,
    library_dir: PathBuf,
    thumbs_dir: PathBuf,
    thumbnailer: Arc<dyn Thumbnailer>,
    op_lock: Mutex<()>,
}

impl Library {
    /// Metadata writes share `git`'s working tree lock, so they never
    /// interleave with a pull or a commit.
    pub fn new(repo: &RepoConfiguration, store: MetadataStore, git: GitRepo) -> Self {
        Self {
            store: store.sharing_lock(git.worktree_lock()),
            git,
            layout: repo.layout.clone(),
            library_dir: repo.library_dir.clone(),
            thumbs_dir: repo.thumbs_dir.clone(),
            thumbnailer: Arc::new(ImageThumbnailer::default()),
            op_lock: Mutex::new(()),
        }
    }

    /// Library backed by the metadata file of `repo`.
    pub fn open(repo: &RepoConfiguration, git: GitRepo) -> Self {
        Self::new(repo, MetadataStore::open(repo.metadata_path.clone()), git)
    }

    pub fn with_thumbnailer(mut self, thumbnailer: impl Thumbnailer + 'static) -> Self {
        self.thumbnailer = Arc::new(thumbnailer);
        self
    }

    pub(crate) fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub async fn document(&self) -> Result<MetadataDocument> {
        self.store.load().await
    }

    pub fn library_path(&self, filename: &str) -> Result<PathBuf> {
        Ok(self.library_dir.join(checked_name(filename)?))
    }

    pub fn thumbnail_path(&self, filename: &str) -> Result<PathBuf> {
        Ok(self.thumbs_dir.join(checked_name(filename)?))
    }

    fn library_rel(&self, filename: &str) -> String {
        join_rel(&self.layout.library_dir, filename)
    }

    fn thumbnail_rel(&self, filename: &str) -> String {
        join_rel(&self.layout.thumbs_dir, filename)
    }

    /// Change set touching only the metadata document.
    pub(crate) fn metadata_change(&self, description: impl Into<String>) -> ChangeSet {
        ChangeSet { files: vec![self.layout.metadata_file.clone()], description: description.into() }
    }

    pub async fn get_image(&self, filename: &str) -> Result<ImageRecord> {
        self.store.load().await?
            .images
            .remove(filename)
            .ok_or_else(|| LibraryError::not_found(format!("image '{filename}'")))
    }

    /// Matching images, newest first.
    pub async fn list_images(&self, query: &ImageQuery) -> Result<Vec<ImageRecord>> {
        let doc = self.store.load().await?;
        let mut images = doc.images.into_values()
            .filter(|image| query.matches(image))
            .collect::<Vec<ImageRecord>>();
        images.sort_by(|a, b| b.added.cmp(&a.added).then_with(|| a.filename.cmp(&b.filename)));
        Ok(images)
    }

    /// Stores a new image: original, thumbnail, then the record.
    /// Anything written before a failure is removed again.
    pub async fn upload(&self, upload: Upload) -> Result<(ImageRecord, ChangeSet)> {
        let _op = self.op_lock.lock().await;
        let Upload { bytes, original_filename, name, matte, filter, tags } = upload;
        if bytes.is_empty() {
            return Err(LibraryError::Upload("file is empty".to_string()));
        }
        let tags = normalize_tags(&tags);
        let mut filename = LibraryFilename::for_upload(&name, &original_filename)?;

        let doc = self.store.load().await?;
        let mut attempts = 0;
        while doc.find_image_ignore_case(&filename.to_string()).is_some()
            || self.library_dir.join(filename.to_string()).exists()
        {
            attempts += 1;
            if attempts >= MAX_SUFFIX_ATTEMPTS {
                return Err(LibraryError::Upload(format!("no free filename for '{}'", filename.base)));
            }
            filename.reroll_suffix();
        }
        let filename = filename.to_string();
        let library_path = self.library_dir.join(&filename);
        let thumbnail_path = self.thumbs_dir.join(&filename);

        write_new(&library_path, &bytes).await
            .map_err(|e| LibraryError::Upload(format!("cannot write {}: {e}", library_path.display())))?;

        let stored = self.finish_upload(&filename, &thumbnail_path, bytes, matte, filter, tags).await;
        match stored {
            Ok(record) => {
                info!("uploaded {}", filename);
                let changes = ChangeSet {
                    files: vec![self.library_rel(&filename), self.thumbnail_rel(&filename), self.layout.metadata_file.clone()],
                    description: format!("added {filename}"),
                };
                Ok((record, changes))
            }
            Err(e) => {
                warn!("upload of {} failed, removing written files: {}", filename, e);
                remove_if_exists(&library_path).await;
                remove_if_exists(&thumbnail_path).await;
                Err(match e {
                    LibraryError::Upload(_) | LibraryError::CorruptStore { .. } | LibraryError::Conflict(_) => e,
                    other => LibraryError::Upload(other.to_string()),
                })
            }
        }
    }

    async fn finish_upload(
        &self,
        filename: &str,
        thumbnail_path: &Path,
        bytes: Vec<u8>,
        matte: Matte,
        filter: PhotoFilter,
        tags: Vec<Tag>,
    ) -> Result<ImageRecord> {
        let ext = filename.rsplit_once('.').map(|(_, ext)| ext.to_string()).unwrap_or_default();
        let thumbnailer = self.thumbnailer.clone();
        let thumbnail = tokio::task::spawn_blocking(move || thumbnailer.derive(&bytes, &ext))
            .await
            .map_err(|e| LibraryError::Upload(format!("thumbnail task failed: {e}")))??;
        tokio::fs::write(thumbnail_path, &thumbnail.bytes).await?;

        let mut record = ImageRecord::new(filename.to_string(), thumbnail.source_dimensions);
        record.matte = matte;
        record.filter = filter;
        record.tags = tags.iter().cloned().collect();
        self.store.mutate(|doc| {
            if doc.find_image_ignore_case(filename).is_some() {
                return Err(LibraryError::conflict(format!("image '{filename}' already exists")));
            }
            doc.ensure_tags(&tags);
            doc.images.insert(record.filename.clone(), record.clone());
            Ok(record)
        }).await
    }

    /// Renames `filename` to `new_base`, keeping suffix and extension.
    pub async fn rename(&self, filename: &str, new_base: &str) -> Result<(ImageRecord, ChangeSet)> {
        let _op = self.op_lock.lock().await;
        let old = LibraryFilename::parse(filename)?;
        let new_name = old.with_base(new_base)?.to_string();

        let doc = self.store.load().await?;
        let record = doc.get_image(filename)
            .cloned()
            .ok_or_else(|| LibraryError::not_found(format!("image '{filename}'")))?;
        if new_name == filename {
            return Ok((record, ChangeSet::default()));
        }
        let taken = doc.images.keys().any(|key| key != filename && key.eq_ignore_ascii_case(&new_name));
        if taken || exists_ignore_case(&self.library_dir, &new_name, filename).await? {
            return Err(LibraryError::conflict(format!("'{new_name}' already exists")));
        }

        let relocation = Relocation {
            store: self.store.clone(),
            from: filename.to_string(),
            to: new_name.clone(),
            library_dir: self.library_dir.clone(),
            thumbs_dir: self.thumbs_dir.clone(),
        };
        // Moves and key migration run as one unit under the working tree
        // lock. Past the timeout the caller gets `SyncTimeout` and the unit
        // still completes or rolls back.
        let (record, thumb_moved) = self.git.exclusive("rename", move |git| relocation.run(git)).await?;

        info!("renamed {} -> {}", filename, new_name);
        let mut files = vec![self.library_rel(filename), self.library_rel(&new_name)];
        if thumb_moved {
            files.push(self.thumbnail_rel(filename));
            files.push(self.thumbnail_rel(&new_name));
        }
        files.push(self.layout.metadata_file.clone());
        Ok((record, ChangeSet { files, description: format!("renamed {filename} -> {new_name}") }))
    }

    /// Drops the record, then the file. If the file cannot be removed the
    /// record is put back.
    pub async fn delete(&self, filename: &str) -> Result<ChangeSet> {
        let _op = self.op_lock.lock().await;
        let library_path = self.library_path(filename)?;
        let removed = self.store.mutate(|doc| {
            doc.images.remove(filename).ok_or_else(|| LibraryError::not_found(format!("image '{filename}'")))
        }).await?;

        match tokio::fs::remove_file(&library_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} was already gone", library_path.display());
            }
            Err(e) => {
                warn!("cannot remove {}, restoring its record: {}", library_path.display(), e);
                let restored = self.store.mutate(|doc| {
                    doc.images.insert(removed.filename.clone(), removed.clone());
                    Ok(())
                }).await;
                if let Err(restore_error) = restored {
                    error!("cannot restore record of {}: {}", filename, restore_error);
                }
                return Err(e.into());
            }
        }
        remove_if_exists(&self.thumbs_dir.join(filename)).await;

        info!("deleted {}", filename);
        Ok(ChangeSet {
            files: vec![self.library_rel(filename), self.thumbnail_rel(filename), self.layout.metadata_file.clone()],
            description: format!("deleted {filename}"),
        })
    }

    pub async fn update_image(&self, filename: &str, update: ImageUpdate) -> Result<(ImageRecord, ChangeSet)> {
        let tags = update.tags.as_deref().map(normalize_tags);
        let record = self.store.mutate(|doc| {
            if let Some(tags) = &tags {
                doc.ensure_tags(tags);
            }
            let record = doc.images.get_mut(filename)
                .ok_or_else(|| LibraryError::not_found(format!("image '{filename}'")))?;
            if let Some(matte) = update.matte {
                record.matte = matte;
            }
            if let Some(filter) = update.filter {
                record.filter = filter;
            }
            if let Some(tags) = tags {
                record.tags = tags.into_iter().collect();
            }
            Ok(record.clone())
        }).await?;
        Ok((record, self.metadata_change(format!("updated {filename}"))))
    }

    /// Adds `tags` to every listed image. Unknown or malformed names are
    /// reported and skipped; the rest of the batch still applies.
    pub async fn bulk_tag(&self, filenames: &[String], tags: &[String]) -> Result<(BulkTagReport, ChangeSet)> {
        let tags = normalize_tags(tags);
        if tags.is_empty() {
            return Err(LibraryError::invalid("no usable tags given"));
        }
        let report = self.store.mutate(|doc| {
            let mut report = BulkTagReport { new_tags: doc.ensure_tags(&tags), ..Default::default() };
            let mut seen = BTreeSet::new();
            for filename in filenames.iter().filter(|x| seen.insert(x.as_str())) {
                if let Err(e) = LibraryFilename::parse(filename) {
                    report.failed.push(BulkTagFailure { filename: filename.clone(), reason: e.to_string() });
                    continue;
                }
                match doc.images.get_mut(filename) {
                    Some(record) => {
                        record.tags.extend(tags.iter().cloned());
                        report.updated.push(filename.clone());
                    }
                    None => report.failed.push(BulkTagFailure {
                        filename: filename.clone(),
                        reason: LibraryError::not_found(format!("image '{filename}'")).to_string(),
                    }),
                }
            }
            Ok(report)
        }).await?;
        info!("tagged {} image(s) with {:?}, {} failed", report.updated.len(), tags, report.failed.len());
        let description = format!("tagged {} image(s)", report.updated.len());
        Ok((report, self.metadata_change(description)))
    }
}

/// A rename's file moves plus the metadata key migration.
struct Relocation {
    store: MetadataStore,
    from: Filename,
    to: Filename,
    library_dir: PathBuf,
    thumbs_dir: PathBuf,
}

impl Relocation {
    /// Returns the migrated record and whether the thumbnail moved along.
    async fn run(self, git: GitSession) -> Result<(ImageRecord, bool)> {
        let (old_path, new_path) = (self.library_dir.join(&self.from), self.library_dir.join(&self.to));
        git.move_path(&old_path, &new_path).await?;

        let (old_thumb, new_thumb) = (self.thumbs_dir.join(&self.from), self.thumbs_dir.join(&self.to));
        let thumb_moved = if old_thumb.exists() {
            match git.move_path(&old_thumb, &new_thumb).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("cannot move thumbnail of {}: {}", self.from, e);
                    false
                }
            }
        } else {
            false
        };

        let (from, to) = (self.from.as_str(), self.to.as_str());
        let migrated = self.store.mutate_in(&git, |doc| {
            if doc.images.keys().any(|key| key != from && key.eq_ignore_ascii_case(to)) {
                return Err(LibraryError::conflict(format!("'{to}' already exists")));
            }
            let mut record = doc.images.remove(from)
                .ok_or_else(|| LibraryError::not_found(format!("image '{from}'")))?;
            record.filename = to.to_string();
            doc.images.insert(to.to_string(), record.clone());
            Ok(record)
        }).await;

        match migrated {
            Ok(record) => Ok((record, thumb_moved)),
            Err(e) => {
                warn!("metadata update for {} failed, moving files back: {}", from, e);
                if let Err(undo) = git.move_path(&new_path, &old_path).await {
                    error!("cannot move {} back to {}: {}", to, from, undo);
                }
                if thumb_moved {
                    if let Err(undo) = git.move_path(&new_thumb, &old_thumb).await {
                        warn!("cannot move thumbnail of {} back: {}", to, undo);
                    }
                }
                Err(e)
            }
        }
    }
}

/// Rejects anything that could escape the library directories.
fn checked_name(filename: &str) -> Result<&str> {
    if filename.is_empty() || filename.starts_with('.') || filename.contains(['/', '\\']) {
        return Err(LibraryError::MalformedFilename(filename.to_string()));
    }
    Ok(filename)
}

fn join_rel(dir: &str, filename: &str) -> String {
    if dir.is_empty() || dir == "." {
        filename.to_string()
    } else {
        format!("{dir}/{filename}")
    }
}

async fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new().write(true).create_new(true).open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("cannot remove {}: {}", path.display(), e),
    }
}

/// Whether `dir` holds an entry named `filename` ignoring case, other than `except`.
async fn exists_ignore_case(dir: &Path, filename: &str, except: &str) -> Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name != except && name.eq_ignore_ascii_case(filename) {
            return Ok(true);
        }
    }
    Ok(false)
}
