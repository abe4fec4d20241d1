//! Key/value storage with TTLs and atomic patches, either local or spread
//! across the cluster by consistent hashing.
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub mod codec;
pub mod distributed;
pub mod key;
pub mod local_store;
pub mod patch;

pub use distributed::DistributedDatastore;
pub use key::{CacheKey, MAX_KEY_LENGTH};
pub use local_store::{CacheEntry, LocalStore, MAX_PATCH_ATTEMPTS};
pub use patch::{PatchOperation, Patched};

/// Operations every datastore offers, wherever the data actually lives.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Live value under `key`, or `None` if absent or expired
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>>;

    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()>;

    async fn remove(&self, key: &CacheKey) -> Result<()>;

    /// Atomically apply `patch` and return its result bytes
    async fn patch(&self, key: &CacheKey, patch: &PatchOperation, ttl: Duration) -> Result<Bytes>;
}

#[async_trait]
impl Datastore for LocalStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        Ok(LocalStore::get(self, key))
    }

    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()> {
        LocalStore::put(self, key.clone(), value, ttl);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        LocalStore::remove(self, key);
        Ok(())
    }

    async fn patch(&self, key: &CacheKey, patch: &PatchOperation, ttl: Duration) -> Result<Bytes> {
        LocalStore::patch(self, key, patch, ttl)
    }
}
