//! Per-subject limit state kept in the distributed datastore
use std::hash::Hasher;
use std::sync::Arc;

use twox_hash::XxHash64;

use super::configs::{ConfiguredRatelimit, HttpMethod};
use super::sliding_window::{CachedRateLimit, LimitHit, NextAvailableResponse};
use crate::clock::SharedClock;
use crate::datastore::{codec, CacheKey, Datastore, PatchOperation};
use crate::config_error;
use crate::error::Result;

/// Subject under which global limits are accounted
pub const GLOBAL_LIMIT_USER: &str = "GlobalLimitUser";

/// Group id under which global limits are stored
pub const GLOBAL_GROUP_ID: &str = "global";

const KEY_PREFIX: &str = "ratelimit";

/// Every node derives the same key for the same (subject, group, limit).
/// Ids are checked when the config is loaded; the subject is digested so
/// that any non-blank subject fits.
pub fn limit_key(subject: &str, group_id: &str, limit_id: &str) -> Result<CacheKey> {
    CacheKey::new(format!(
        "{}:{}:{}:{}",
        KEY_PREFIX,
        group_id,
        limit_id,
        subject_digest(subject)
    ))
    .map_err(|err| {
        config_error!(
            "Unusable rate limit key for limit {} in group {}: {}",
            limit_id,
            group_id,
            err
        )
    })
}

/// 128-bit hex digest of the subject
fn subject_digest(subject: &str) -> String {
    let hash = |seed: u64| {
        let mut hasher = XxHash64::with_seed(seed);
        hasher.write(subject.as_bytes());
        hasher.finish()
    };
    format!("{:016x}{:016x}", hash(0), hash(1))
}

#[derive(Clone)]
pub struct RateLimitCache {
    datastore: Arc<dyn Datastore>,
    clock: SharedClock,
}

impl std::fmt::Debug for RateLimitCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitCache")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl RateLimitCache {
    pub fn new(datastore: Arc<dyn Datastore>, clock: SharedClock) -> Self {
        Self { datastore, clock }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Record one hit for `subject` against `limit`. The hit is applied on
    /// the key's owner, so concurrent callers never lose each other's hits.
    pub async fn update_limit(
        &self,
        method: HttpMethod,
        subject: &str,
        group_id: &str,
        limit: &ConfiguredRatelimit,
    ) -> Result<NextAvailableResponse> {
        let key = limit_key(subject, group_id, &limit.id)?;
        let hit = LimitHit {
            limit: limit.into(),
            method,
            now_millis: self.clock.now_millis(),
        };
        let result = self
            .datastore
            .patch(&key, &PatchOperation::TrackHit(hit), limit.unit.window())
            .await?;
        NextAvailableResponse::decode(&result)
    }

    /// Current state without recording a hit. Unreadable state reads as none.
    pub async fn get_limit(
        &self,
        subject: &str,
        group_id: &str,
        limit: &ConfiguredRatelimit,
    ) -> Result<Option<CachedRateLimit>> {
        let key = limit_key(subject, group_id, &limit.id)?;
        let Some(bytes) = self.datastore.get(&key).await? else {
            return Ok(None);
        };
        match codec::decode::<CachedRateLimit>(&bytes) {
            Ok(cached) => Ok(Some(cached.view_at(self.clock.now_millis()))),
            Err(err) => {
                tracing::warn!("Ignoring undecodable rate limit at {}: {}", key, err);
                Ok(None)
            }
        }
    }
}
