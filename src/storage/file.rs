use std::{
    collections::HashMap,
    fmt, io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::instrument;

use super::{DeletePolicy, PersistentStore, Store};
use crate::{
    error::StoreError,
    fs::{Filesystem, OsFs},
};

#[derive(Debug, Default)]
struct FileState {
    cache: HashMap<String, String>,
    dirty: bool,
}

/// Cache backed by a JSON object on a [`Filesystem`].
///
/// The cache is authoritative while the store is open; the file only changes
/// on flush (`sync`, `close`, or every mutation when `save_on_change` is set).
///
/// Flushes are blocking writes done under the write lock, on whatever thread
/// polls the future, so with `save_on_change` every mutation stalls its
/// runtime worker for the length of a file write.
#[derive(Debug)]
pub struct FileStore<F: Filesystem = OsFs> {
    fs: F,
    path: PathBuf,
    save_on_change: bool,
    delete_policy: DeletePolicy,
    state: RwLock<FileState>,
}

impl<F: Filesystem> FileStore<F> {
    /// Opens the store at `path`, creating an empty file if there is none and
    /// loading the existing document otherwise.
    #[instrument(skip(fs), err)]
    pub fn open(
        fs: F,
        path: impl AsRef<Path> + fmt::Debug,
        save_on_change: bool,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        match touch(&fs, path) {
            Ok(()) => tracing::info!(path = %path.display(), "Created store file"),
            Err(e) if e.is_file_already_exists() => {}
            Err(e) => {
                tracing::error!(error = %e, "Couldn't touch store file");
                return Err(StoreError::DataSourceDoesNotExist {
                    name: path.display().to_string(),
                });
            }
        }

        Self::load(fs, path, save_on_change)
    }

    /// Like [`FileStore::open`], but refuses to reuse a file that is already
    /// there.
    #[instrument(skip(fs), err)]
    pub fn create_new(
        fs: F,
        path: impl AsRef<Path> + fmt::Debug,
        save_on_change: bool,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        touch(&fs, path)?;

        Self::load(fs, path, save_on_change)
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    fn load(fs: F, path: &Path, save_on_change: bool) -> Result<Self, StoreError> {
        let data = fs.read(path).map_err(|source| StoreError::Io {
            path: path.to_owned(),
            source,
        })?;

        let cache: HashMap<String, String> = if data.is_empty() {
            HashMap::new()
        } else {
            serde_json::from_slice(&data).map_err(|source| StoreError::Json {
                path: path.to_owned(),
                source,
            })?
        };
        tracing::info!(path = %path.display(), keys = cache.len(), "Loaded store file");

        Ok(Self {
            fs,
            path: path.to_owned(),
            save_on_change,
            delete_policy: DeletePolicy::Lenient,
            state: RwLock::new(FileState {
                cache,
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save_on_change(&self) -> bool {
        self.save_on_change
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Writes the whole cache if it has unsaved changes. The caller holds the
    /// write lock, so no mutation can interleave with the write.
    #[instrument(skip(self, state), fields(path = %self.path.display()), err)]
    fn flush_locked(&self, state: &mut FileState) -> Result<(), StoreError> {
        if !state.dirty {
            return Ok(());
        }

        let data = serde_json::to_vec(&state.cache).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        self.fs
            .write_truncate(&self.path, &data)
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        state.dirty = false;

        tracing::debug!(
            bytes = data.len(),
            keys = state.cache.len(),
            "Flushed store file"
        );
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.state.write();
        self.flush_locked(&mut state)
    }
}

/// Creates `path` as an empty file, or reports that it is already there.
fn touch(fs: &impl Filesystem, path: &Path) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_owned(),
        source,
    };

    if fs.exists(path).map_err(io_err)? {
        return Err(StoreError::FileAlreadyExists {
            filename: path.display().to_string(),
        });
    }

    match fs.create(path) {
        Ok(()) => Ok(()),
        // Lost a race with another creator.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(StoreError::FileAlreadyExists {
                filename: path.display().to_string(),
            })
        }
        Err(e) => Err(io_err(e)),
    }
}

#[async_trait]
impl<F: Filesystem> Store for FileStore<F> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state.read().cache.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state.cache.insert(key.to_owned(), value.to_owned());
        state.dirty = true;

        if self.save_on_change {
            return self.flush_locked(&mut state);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.cache.remove(key).is_none() {
            return self.delete_policy.absent(key);
        }
        state.dirty = true;

        if self.save_on_change {
            return self.flush_locked(&mut state);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.read().cache.keys().cloned().collect())
    }

    async fn values(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.read().cache.values().cloned().collect())
    }

    fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    fn as_persistent(&self) -> Option<&dyn PersistentStore> {
        Some(self)
    }
}

#[async_trait]
impl<F: Filesystem> PersistentStore for FileStore<F> {
    async fn sync(&self) -> Result<(), StoreError> {
        self.flush()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.flush()?;
        tracing::info!(path = %self.path.display(), "Closed store file");
        Ok(())
    }
}

impl<F: Filesystem> Drop for FileStore<F> {
    fn drop(&mut self) {
        if self.state.get_mut().dirty {
            tracing::warn!(path = %self.path.display(), "Store dropped with unsaved changes");
        }
    }
}
