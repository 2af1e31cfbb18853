//! Durable store for received files.
//!
//! Files live flat under one root directory, keyed by the filename the
//! client sent. Writers and readers of the same name are serialized through
//! a per-name async lock; different names proceed independently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid filename {0:?}")]
    InvalidName(String),
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Reject names that could escape the root or that no file can have.
pub fn validate_name(name: &str) -> Result<&str, StoreError> {
    let name = name.trim();
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.starts_with('.');
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(name)
}

#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    list_extensions: Arc<Vec<String>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io("create", &root, e))?;
        Ok(Self {
            root,
            list_extensions: Arc::new(Vec::new()),
            locks: Arc::new(DashMap::new()),
        })
    }

    /// Restrict listings to these extensions (without the dot).
    pub fn with_list_extensions(mut self, extensions: Vec<String>) -> Self {
        let normalized = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self.list_extensions = Arc::new(normalized);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(validate_name(name)?))
    }

    /// Hold exclusive access to `name` until the guard drops. The entry for
    /// `name` is removed once no session holds or waits for it.
    pub async fn lock(&self, name: &str) -> NameGuard {
        let lock = self.locks.entry(name.to_string()).or_default().clone();
        NameGuard {
            name: name.to_string(),
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    pub(crate) fn lock_entries(&self) -> usize {
        self.locks.len()
    }

    /// Replace the contents of `name`. Written to a temporary sibling first,
    /// then renamed over the target.
    pub async fn write(&self, name: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.path_of(name)?;
        let tmp = self.root.join(format!(".{}.partial", validate_name(name)?));
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| StoreError::io("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io("rename", &path, e))?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "file stored");
        Ok(path)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_of(name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::io("read", &path, e))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.path_of(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io("stat", &path, e)),
        }
    }

    /// Stored filenames, sorted.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io("list", &self.root, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("list", &self.root, e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_file && !name.starts_with('.') && self.listed(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn listed(&self, name: &str) -> bool {
        if self.list_extensions.is_empty() {
            return true;
        }
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.list_extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

/// Exclusive access to one stored name. See [`FileStore::lock`].
pub struct NameGuard {
    name: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or awaits it.
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}
