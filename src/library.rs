//! Photo library: saved captures and change notifications.
//!
//! Captures are written as `<sha256-prefix>.jpg` into a single directory.
//! Observers registered with [`PhotoLibrary::subscribe`] stay registered only
//! while the returned [`Subscription`] is alive.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;
use thiserror::Error;

use crate::camera::looks_like_jpeg;
use crate::dispatch::DeliveryContext;

/// What changed in the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryChange {
    Added(PathBuf),
    Cleared,
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("not a JPEG image ({0} bytes)")]
    InvalidImage(usize),

    #[error("library I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Observer = Arc<dyn Fn(&LibraryChange) + Send + Sync>;

/// Storage for captured images.
pub trait PhotoLibrary: Send + Sync {
    /// Save JPEG bytes. Returns where they were stored.
    fn save_image(&self, data: &[u8]) -> Result<PathBuf, LibraryError>;

    /// Most recently saved image, if any.
    fn latest_image(&self) -> Result<Option<PathBuf>, LibraryError>;

    fn subscribe(&self, observer: Observer) -> Subscription;
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    entries: BTreeMap<u64, Observer>,
}

/// Set of change observers with handle-scoped registration.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<Mutex<Observers>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Observer) -> Subscription {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(id, observer);
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Call every registered observer, in registration order.
    pub fn notify(&self, change: &LibraryChange) {
        let observers: Vec<Observer> = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .values()
            .cloned()
            .collect();
        for observer in observers {
            observer(change);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps an observer registered. Dropping it unregisters.
#[must_use = "dropping a Subscription unregisters the observer"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Observers>>,
}

impl Subscription {
    /// Unregister now.
    pub fn cancel(self) {}

    /// Whether the observer is still registered.
    pub fn is_active(&self) -> bool {
        self.registry.upgrade().is_some_and(|inner| {
            inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entries
                .contains_key(&self.id)
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entries
                .remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Photo library backed by a directory of JPEG files.
pub struct DirectoryLibrary {
    dir: PathBuf,
    observers: ObserverRegistry,
}

impl DirectoryLibrary {
    /// Does not create the directory; it is created on first save.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            observers: ObserverRegistry::new(),
        }
    }

    /// Default: ~/.local/share/glitters/library/ (platform data dir)
    pub fn with_default_dir() -> Self {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("glitters")
            .join("library");
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name stem for image bytes: first 16 bytes of SHA256, hex encoded.
    pub fn hash_image(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    /// All saved images, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>, LibraryError> {
        let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();

        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) == Some("jpg") {
                if let Ok(metadata) = entry.metadata() {
                    if metadata.is_file() {
                        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                        files.push((path, modified));
                    }
                }
            }
        }

        files.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(files.into_iter().map(|(path, _)| path).collect())
    }

    /// Delete every saved image. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, LibraryError> {
        let files = self.list()?;
        let mut removed = 0;
        for path in &files {
            if std::fs::remove_file(path).is_ok() {
                removed += 1;
            }
        }
        log::info!("Cleared {} image(s) from {}", removed, self.dir.display());
        self.observers.notify(&LibraryChange::Cleared);
        Ok(removed)
    }
}

impl PhotoLibrary for DirectoryLibrary {
    fn save_image(&self, data: &[u8]) -> Result<PathBuf, LibraryError> {
        if !looks_like_jpeg(data) {
            return Err(LibraryError::InvalidImage(data.len()));
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.jpg", Self::hash_image(data)));
        // Rewriting an existing file refreshes its mtime so it becomes latest.
        std::fs::write(&path, data)?;
        log::debug!("Saved {} bytes to {}", data.len(), path.display());
        self.observers.notify(&LibraryChange::Added(path.clone()));
        Ok(path)
    }

    fn latest_image(&self) -> Result<Option<PathBuf>, LibraryError> {
        Ok(self.list()?.pop())
    }

    fn subscribe(&self, observer: Observer) -> Subscription {
        self.observers.register(observer)
    }
}

/// Report the latest image now and again after every library change.
///
/// `on_latest` always runs on `context`. Drop the returned handle to stop.
pub fn watch_latest<F>(
    library: Arc<dyn PhotoLibrary>,
    context: Arc<dyn DeliveryContext>,
    on_latest: F,
) -> Subscription
where
    F: Fn(Option<PathBuf>) + Send + Sync + 'static,
{
    let on_latest = Arc::new(on_latest);

    let refresh = {
        let library = Arc::downgrade(&library);
        let context = Arc::clone(&context);
        move || {
            let library = library.clone();
            let on_latest = Arc::clone(&on_latest);
            context.deliver(Box::new(move || {
                let Some(library) = library.upgrade() else {
                    return;
                };
                match library.latest_image() {
                    Ok(latest) => on_latest(latest),
                    Err(e) => log::warn!("Failed to read latest library image: {}", e),
                }
            }));
        }
    };

    refresh();
    library.subscribe(Arc::new(move |_change: &LibraryChange| refresh()))
}
