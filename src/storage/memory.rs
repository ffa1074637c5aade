use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DeletePolicy, Store};
use crate::error::StoreError;

/// Process-lifetime map. Deleting an absent key is an error by default.
#[derive(Debug)]
pub struct Memory {
    data: RwLock<HashMap<String, String>>,
    delete_policy: DeletePolicy,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            data: RwLock::default(),
            delete_policy: DeletePolicy::Strict,
        }
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }
}

#[async_trait]
impl Store for Memory {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.data.write().remove(key);
        match removed {
            Some(_) => Ok(()),
            None => self.delete_policy.absent(key),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.data.read().keys().cloned().collect())
    }

    async fn values(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.data.read().values().cloned().collect())
    }

    fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }
}
