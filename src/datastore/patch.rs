//! Atomic read-modify-write operations applied by the owning node.
//!
//! A patch is shipped to whichever node owns the key and applied there against
//! the current value under the store's compare-and-swap loop. Every patch
//! yields the new value to store plus a result returned to the caller.
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::codec;
use crate::error::Result;
use crate::limiters::sliding_window::{self, LimitHit};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PatchOperation {
    /// Add `delta` to an i64 counter, starting from zero when absent
    Increment { delta: i64 },
    /// Record a request against a sliding-window rate limit
    TrackHit(LimitHit),
}

/// Output of applying a patch to the current value
#[derive(Clone, Debug, PartialEq)]
pub struct Patched {
    pub value: Bytes,
    pub result: Bytes,
}

impl PatchOperation {
    /// Apply to `current` (`None` when absent or expired). Must be pure: the
    /// store may call it more than once for a single patch under contention.
    pub fn apply(&self, current: Option<&[u8]>) -> Result<Patched> {
        match self {
            PatchOperation::Increment { delta } => {
                let counter = match current.map(codec::decode::<i64>) {
                    Some(Ok(counter)) => counter,
                    Some(Err(err)) => {
                        tracing::warn!("Discarding undecodable counter: {}", err);
                        0
                    }
                    None => 0,
                };
                let value = codec::encode(&counter.saturating_add(*delta))?;
                Ok(Patched {
                    result: value.clone(),
                    value,
                })
            }
            PatchOperation::TrackHit(hit) => sliding_window::apply_hit(hit, current),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        codec::encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        codec::decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_starts_from_zero() {
        let patched = PatchOperation::Increment { delta: 5 }.apply(None).unwrap();
        assert_eq!(codec::decode::<i64>(&patched.result).unwrap(), 5);
        assert_eq!(patched.value, patched.result);
    }

    #[test]
    fn increment_adds_to_current() {
        let current = codec::encode(&40i64).unwrap();
        let patched = PatchOperation::Increment { delta: 2 }
            .apply(Some(&current))
            .unwrap();
        assert_eq!(codec::decode::<i64>(&patched.value).unwrap(), 42);
    }

    #[test]
    fn corrupt_current_value_is_treated_as_absent() {
        let patched = PatchOperation::Increment { delta: 1 }
            .apply(Some(&[0xff, 0xff, 0xff]))
            .unwrap();
        assert_eq!(codec::decode::<i64>(&patched.value).unwrap(), 1);
    }

    #[test]
    fn increment_over_a_rate_limit_window_is_a_cast_mismatch() {
        let window = sliding_window::CachedRateLimit::new(sliding_window::LimitSnapshot {
            id: "one".to_string(),
            unit: crate::limiters::TimeUnit::Minute,
            value: 10,
        });
        let current = codec::encode(&window).unwrap();
        let patched = PatchOperation::Increment { delta: 1 }
            .apply(Some(&current))
            .unwrap();
        assert_eq!(codec::decode::<i64>(&patched.value).unwrap(), 1);
    }

    #[test]
    fn patch_wire_form_decodes() {
        let op = PatchOperation::Increment { delta: -3 };
        let bytes = op.encode().unwrap();
        assert_eq!(PatchOperation::decode(&bytes).unwrap(), op);
        assert!(PatchOperation::decode(b"\xff\xfe not a patch").is_err());
    }
}
