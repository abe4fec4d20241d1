//! Sliding-window hit accounting.
//!
//! A window keeps the timestamps of the allowed hits seen within the last
//! window length. A new hit is allowed while fewer than `value` hits remain
//! in the window; once full, the next slot opens when the oldest hit ages out.
use std::collections::VecDeque;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::configs::{ConfiguredRatelimit, HttpMethod, TimeUnit};
use crate::clock::to_datetime;
use crate::datastore::{codec, Patched};
use crate::error::Result;

/// The parts of a limit definition that decide accounting
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitSnapshot {
    pub id: String,
    pub unit: TimeUnit,
    pub value: u32,
}

impl From<&ConfiguredRatelimit> for LimitSnapshot {
    fn from(limit: &ConfiguredRatelimit) -> Self {
        Self {
            id: limit.id.clone(),
            unit: limit.unit,
            value: limit.value,
        }
    }
}

/// A request to account against a limit, stamped by the caller's clock
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitHit {
    pub limit: LimitSnapshot,
    pub method: HttpMethod,
    pub now_millis: i64,
}

/// Stored state of one subject against one limit
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CachedRateLimit {
    pub limit: LimitSnapshot,
    /// Allowed hit times in unix millis, oldest first
    pub hits: VecDeque<i64>,
}

/// Verdict for one hit
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NextAvailableResponse {
    pub allowed: bool,
    pub next_available_millis: i64,
    pub remaining: u32,
}

impl NextAvailableResponse {
    pub fn decode(data: &Bytes) -> Result<Self> {
        codec::decode(data)
    }

    pub fn next_available_at(&self) -> DateTime<Utc> {
        to_datetime(self.next_available_millis)
    }

    /// Whole seconds until the next slot opens, never less than one
    pub fn retry_after_secs(&self, now_millis: i64) -> u64 {
        let wait = self.next_available_millis.saturating_sub(now_millis).max(0) as u64;
        wait.div_ceil(1000).max(1)
    }
}

impl CachedRateLimit {
    pub fn new(limit: LimitSnapshot) -> Self {
        Self {
            limit,
            hits: VecDeque::new(),
        }
    }

    fn window_millis(&self) -> i64 {
        self.limit.unit.window_millis()
    }

    /// Forget hits at or before `now - window`
    pub fn drop_expired(&mut self, now: i64) {
        let cutoff = now.saturating_sub(self.window_millis());
        while self.hits.front().is_some_and(|hit| *hit <= cutoff) {
            self.hits.pop_front();
        }
    }

    pub fn remaining(&self) -> u32 {
        let used = u32::try_from(self.hits.len()).unwrap_or(u32::MAX);
        self.limit.value.saturating_sub(used)
    }

    /// When the next hit would be allowed, assuming expired hits are gone
    pub fn next_available_millis(&self, now: i64) -> i64 {
        if self.remaining() > 0 {
            return now;
        }
        // with value zero there is no hit to age out
        let oldest = self.hits.front().copied().unwrap_or(now);
        oldest.saturating_add(self.window_millis())
    }

    /// Account one hit at `now`
    pub fn track(&mut self, now: i64) -> NextAvailableResponse {
        self.drop_expired(now);
        let allowed = self.remaining() > 0;
        if allowed {
            // callers stamp hits with their own clocks, so keep the deque sorted
            let position = self.hits.partition_point(|hit| *hit <= now);
            self.hits.insert(position, now);
        }
        NextAvailableResponse {
            allowed,
            next_available_millis: self.next_available_millis(now),
            remaining: self.remaining(),
        }
    }

    /// State as of `now` without recording anything
    pub fn view_at(&self, now: i64) -> Self {
        let mut view = self.clone();
        view.drop_expired(now);
        view
    }
}

/// Patch body for [`crate::datastore::PatchOperation::TrackHit`]
pub fn apply_hit(hit: &LimitHit, current: Option<&[u8]>) -> Result<Patched> {
    let mut cached = match current.map(codec::decode::<CachedRateLimit>) {
        Some(Ok(cached)) => cached,
        Some(Err(err)) => {
            tracing::warn!("Discarding undecodable rate limit for {}: {}", hit.limit.id, err);
            CachedRateLimit::new(hit.limit.clone())
        }
        None => CachedRateLimit::new(hit.limit.clone()),
    };
    if cached.limit != hit.limit {
        tracing::debug!(
            "Limit {} changed from {:?} to {:?}",
            hit.limit.id,
            cached.limit,
            hit.limit
        );
        cached.limit = hit.limit.clone();
    }
    let response = cached.track(hit.now_millis);
    Ok(Patched {
        value: codec::encode(&cached)?,
        result: codec::encode(&response)?,
    })
}
