use std::path::Path;

use crate::util::retry::{retry_with_backoff, RetryPolicy};

use super::{ObjectMeta, ObjectStore, StoreError};

/// [`ObjectStore`] access with every network operation wrapped in
/// retry-with-exponential-backoff.
///
/// Exhausted retries surface as the final attempt's error; callers decide
/// whether that aborts their cycle.
pub struct StorageTransport<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S: ObjectStore> StorageTransport<S> {
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn put(
        &self,
        key: &str,
        file: &Path,
        metadata: &[(String, String)],
    ) -> Result<(), StoreError> {
        retry_with_backoff(self.policy, "upload", || {
            self.store.put(key, file, metadata)
        })
    }

    pub fn get(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
        retry_with_backoff(self.policy, "download", || self.store.get(key, dest))
    }

    pub fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        retry_with_backoff(self.policy, "list", || self.store.list(prefix))
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        retry_with_backoff(self.policy, "delete", || self.store.delete(key))
    }

    /// Cheap reachability probe used before a cycle commits to work.
    pub fn probe(&self, prefix: &str) -> Result<(), StoreError> {
        self.list(prefix).map(|_| ())
    }
}
