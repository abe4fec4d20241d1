use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MalformedRequest;

/// Longest key accepted by a datastore, in bytes
pub const MAX_KEY_LENGTH: usize = 512;

/// Identifier for a cached object. The same logical resource must always
/// produce the same key, since placement on the hash ring depends on it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Result<Self, MalformedRequest> {
        let key = key.into();
        if key.is_empty() || key.len() > MAX_KEY_LENGTH || key.chars().any(char::is_control) {
            return Err(MalformedRequest::CacheKeyInvalid);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = MalformedRequest;

    fn try_from(key: &str) -> Result<Self, Self::Error> {
        CacheKey::new(key)
    }
}
