//! In-memory TTL store owned by this node
use std::time::Duration;

use bytes::Bytes;
use papaya::{Compute, HashMap, Operation};

use super::{CacheKey, PatchOperation};
use crate::clock::{duration_millis, SharedClock};
use crate::concurrency_error;
use crate::error::Result;

/// Give up on a patch after this many lost compare-and-swap races
pub const MAX_PATCH_ATTEMPTS: usize = 16;

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub value: Bytes,
    pub expires_at: i64,
}

impl CacheEntry {
    fn new(value: Bytes, now: i64, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now.saturating_add(duration_millis(ttl)),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Expired entries read as absent from the moment they expire; the sweep
/// only reclaims their memory.
#[derive(Clone, Debug)]
pub struct LocalStore {
    entries: HashMap<CacheKey, CacheEntry>,
    clock: SharedClock,
}

impl LocalStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let now = self.clock.now_millis();
        self.entries
            .pin()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Store `value`, replacing any previous entry and its TTL
    pub fn put(&self, key: CacheKey, value: Bytes, ttl: Duration) {
        let now = self.clock.now_millis();
        self.entries.pin().insert(key, CacheEntry::new(value, now, ttl));
    }

    /// Returns whether a live entry was removed
    pub fn remove(&self, key: &CacheKey) -> bool {
        let now = self.clock.now_millis();
        self.entries
            .pin()
            .remove(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Atomically apply `patch` to the live value under `key` and store the
    /// result with a fresh TTL. Returns the patch's result bytes.
    pub fn patch(&self, key: &CacheKey, patch: &PatchOperation, ttl: Duration) -> Result<Bytes> {
        let now = self.clock.now_millis();
        let mut attempts = 0;
        let mut outcome = None;

        let entries = self.entries.pin();
        let computed = entries.compute(key.clone(), |current| {
            attempts += 1;
            if attempts > MAX_PATCH_ATTEMPTS {
                return Operation::Abort(concurrency_error!(
                    "patch on {} lost {} update races",
                    key,
                    MAX_PATCH_ATTEMPTS
                ));
            }
            let live = current
                .map(|(_, entry)| entry)
                .filter(|entry| !entry.is_expired(now))
                .map(|entry| entry.value.as_ref());
            match patch.apply(live) {
                Ok(patched) => {
                    outcome = Some(patched.result);
                    Operation::Insert(CacheEntry::new(patched.value, now, ttl))
                }
                Err(err) => Operation::Abort(err),
            }
        });

        match computed {
            Compute::Aborted(err) => Err(err),
            _ => outcome.ok_or_else(|| concurrency_error!("patch on {} produced no result", key)),
        }
    }

    /// Drop expired entries to keep the map from growing endlessly.
    /// Returns the number of entries reclaimed.
    pub fn expire_keys(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        // the sweep may touch every entry, so take an owned pin
        self.entries
            .pin_owned()
            .retain(|_key, entry| !entry.is_expired(now));
        let reclaimed = before.saturating_sub(self.entries.len());
        if reclaimed > 0 {
            tracing::debug!("Expired {} datastore entries", reclaimed);
        }
        reclaimed
    }
}
