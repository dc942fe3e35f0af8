use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use crate::entities::MetadataDocument;
use crate::error::{LibraryError, Result};
use crate::git::GitSession;

const REQUIRED_KEYS: [&str; 3] = ["images", "tvs", "tags"];

#[async_trait]
pub trait MetadataBackend: Send + Sync {
    /// Where the document lives, for error messages.
    fn location(&self) -> PathBuf;
    /// `None` when nothing has been persisted yet.
    async fn read(&self) -> Result<Option<String>>;
    async fn write(&self, contents: String) -> Result<()>;
}

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl MetadataBackend for FileBackend {
    fn location(&self) -> PathBuf {
        self.path.clone()
    }

    async fn read(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, contents: String) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, contents.as_bytes()))
            .await
            .map_err(|e| LibraryError::Io(std::io::Error::other(e)))?
    }
}

/// Writes `bytes` to a sibling temp file, fsyncs it and renames it over `path`,
/// so readers only ever see the old or the new contents.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| LibraryError::Io(e.error))?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    contents: std::sync::Mutex<Option<String>>,
}

impl InMemoryBackend {
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self { contents: std::sync::Mutex::new(Some(contents.into())) }
    }
}

#[async_trait]
impl MetadataBackend for InMemoryBackend {
    fn location(&self) -> PathBuf {
        PathBuf::from("<memory>")
    }

    async fn read(&self) -> Result<Option<String>> {
        Ok(self.contents.lock().map(|x| x.clone()).unwrap_or_default())
    }

    async fn write(&self, contents: String) -> Result<()> {
        if let Ok(mut guard) = self.contents.lock() {
            *guard = Some(contents);
        }
        Ok(())
    }
}

/// Single owner of the metadata document.
///
/// Reads always go to the backend so that a document replaced by a git pull
/// is picked up. Mutations are serialized: a second `mutate` waits until the
/// first one has been written. When the lock is shared with the working
/// tree's git lane, a pull or commit never interleaves with a write.
#[derive(Clone)]
pub struct MetadataStore {
    backend: Arc<dyn MetadataBackend>,
    write_lock: Arc<Mutex<()>>,
}

impl MetadataStore {
    pub fn new(backend: impl MetadataBackend + 'static) -> Self {
        Self { backend: Arc::new(backend), write_lock: Arc::new(Mutex::new(())) }
    }

    /// Serializes writes on `lock` instead of a lock of its own.
    pub fn sharing_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.write_lock = lock;
        self
    }

    pub fn open(path: PathBuf) -> Self {
        info!("metadata: {}", path.display());
        Self::new(FileBackend::new(path))
    }

    pub async fn load(&self) -> Result<MetadataDocument> {
        let Some(contents) = self.backend.read().await? else {
            debug!("no metadata document yet, starting empty");
            return Ok(MetadataDocument::default());
        };
        self.parse(&contents)
    }

    fn parse(&self, contents: &str) -> Result<MetadataDocument> {
        let corrupt = |reason: String| LibraryError::CorruptStore { path: self.backend.location(), reason };
        let value: serde_json::Value = serde_json::from_str(contents).map_err(|e| corrupt(e.to_string()))?;
        let object = value.as_object().ok_or_else(|| corrupt("top level is not an object".to_string()))?;
        if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !object.contains_key(**key)) {
            return Err(corrupt(format!("missing required key '{missing}'")));
        }
        serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))
    }

    /// Applies `f` to the current document and persists the result with one
    /// atomic write. If `f` fails nothing is written.
    pub async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MetadataDocument) -> Result<T>,
    {
        let _guard = self.write_lock.lock().await;
        self.apply(f).await
    }

    /// `mutate` for code already running under the working tree lock, which
    /// must be the lock this store shares.
    pub async fn mutate_in<T, F>(&self, _git: &GitSession, f: F) -> Result<T>
    where
        F: FnOnce(&mut MetadataDocument) -> Result<T>,
    {
        self.apply(f).await
    }

    async fn apply<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MetadataDocument) -> Result<T>,
    {
        let mut doc = self.load().await?;
        let result = f(&mut doc)?;
        let serialized = serde_json::to_string_pretty(&doc)?;
        self.backend.write(serialized).await?;
        Ok(result)
    }
}
