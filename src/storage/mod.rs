mod file;
mod memory;
mod redis;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;

pub use self::{file::FileStore, memory::Memory, redis::RedisStore};
use crate::error::StoreError;

/// What `delete` does when the key is not there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeletePolicy {
    /// Report [`StoreError::MissingKey`].
    Strict,
    /// Treat it as done.
    Lenient,
}

impl DeletePolicy {
    pub(crate) fn absent(self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::Strict => Err(StoreError::missing_key(key)),
            Self::Lenient => Ok(()),
        }
    }
}

#[async_trait]
pub trait Store: fmt::Debug + Send + Sync {
    /// Gets the value for a key. `Ok(None)` means the key is not stored;
    /// `Err` means the backend could not answer.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Sets a value for a key, replacing the existing value if any.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deletes a key. Absent keys are handled per [`Store::delete_policy`].
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    async fn values(&self) -> Result<Vec<String>, StoreError>;

    fn delete_policy(&self) -> DeletePolicy;

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Flush and close, for backends that buffer writes.
    fn as_persistent(&self) -> Option<&dyn PersistentStore> {
        None
    }
}

/// A store that buffers writes and flushes them to a durable medium.
#[async_trait]
pub trait PersistentStore: Store {
    /// Flushes buffered changes, keeping the store usable.
    async fn sync(&self) -> Result<(), StoreError>;

    /// Flushes buffered changes. The store must not be used afterwards.
    async fn close(&self) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn Store + Send + Sync + 'static>;
