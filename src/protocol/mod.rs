//! HTTP wire protocol spoken between datastore peers.
//!
//! Objects live under [`OBJECT_PATH_PREFIX`] with the cache key as the single
//! trailing path segment. Every request carries the caller's host key; writes
//! also carry a TTL in whole seconds.
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use reqwest::Url;

use crate::datastore::{CacheKey, LocalStore, PatchOperation};
use crate::error::{DipperError, MalformedRequest, Result};
use crate::{config_error, invalid_argument};

pub mod executor;

pub use executor::{RemoteExecutor, RemoteSettings};

pub const OBJECT_PATH_PREFIX: &str = "/powerapi/dist-datastore/objects";
pub const HOST_KEY_HEADER: &str = "x-pp-host-key";
pub const TTL_HEADER: &str = "x-ttl";
pub const TRACE_ID_HEADER: &str = "x-trans-id";

/// TTL applied to writes that omit the TTL header
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// Largest object or patch body accepted
pub const MAX_OBJECT_SIZE: usize = 2 * 1024 * 1024;

/// Wire URL for `key` on `peer`. The key is percent-encoded into one path
/// segment so that slashes and other reserved characters survive the trip.
pub fn object_url(peer: SocketAddr, key: &CacheKey) -> Result<Url> {
    let mut url = Url::parse(&format!("http://{}/", peer))
        .map_err(|err| invalid_argument!("Unusable peer address {}: {}", peer, err))?;
    url.path_segments_mut()
        .map_err(|_| config_error!("Peer url {} cannot take path segments", peer))?
        .pop_if_empty()
        .extend(OBJECT_PATH_PREFIX.trim_start_matches('/').split('/'))
        .push(key.as_str());
    Ok(url)
}

pub fn host_key(headers: &HeaderMap) -> std::result::Result<&str, MalformedRequest> {
    headers
        .get(HOST_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .ok_or(MalformedRequest::MissingHostKey)
}

/// TTL from the request headers, defaulting when absent
pub fn parse_ttl(headers: &HeaderMap) -> std::result::Result<Duration, MalformedRequest> {
    let Some(value) = headers.get(TTL_HEADER) else {
        return Ok(DEFAULT_TTL);
    };
    value
        .to_str()
        .ok()
        .and_then(|ttl| ttl.trim().parse::<i64>().ok())
        .filter(|ttl| *ttl > 0)
        .map(|ttl| Duration::from_secs(ttl.unsigned_abs()))
        .ok_or(MalformedRequest::TtlNotPositive)
}

/// Whole seconds for the TTL header, rounding partial seconds up
pub fn ttl_header_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

/// Correlation id from the request, or a fresh one
pub fn trace_id(headers: &HeaderMap) -> String {
    headers
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_trace_id)
}

pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One datastore operation as it travels between peers
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteCommand {
    Get {
        key: CacheKey,
    },
    Put {
        key: CacheKey,
        value: Bytes,
        ttl: Duration,
    },
    Patch {
        key: CacheKey,
        patch: PatchOperation,
        ttl: Duration,
    },
    Delete {
        key: CacheKey,
    },
}

/// What a peer reported back for a [`RemoteCommand`]
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteOutcome {
    Value(Option<Bytes>),
    Stored,
    Patched(Bytes),
    Removed,
}

impl RemoteCommand {
    pub fn key(&self) -> &CacheKey {
        match self {
            RemoteCommand::Get { key }
            | RemoteCommand::Put { key, .. }
            | RemoteCommand::Patch { key, .. }
            | RemoteCommand::Delete { key } => key,
        }
    }

    pub fn method(&self) -> Method {
        match self {
            RemoteCommand::Get { .. } => Method::GET,
            RemoteCommand::Put { .. } => Method::PUT,
            RemoteCommand::Patch { .. } => Method::PATCH,
            RemoteCommand::Delete { .. } => Method::DELETE,
        }
    }

    /// The checks that come before the body: host key, cache key, and the
    /// TTL of writes.
    pub fn check_envelope(
        method: &Method,
        raw_key: &str,
        headers: &HeaderMap,
    ) -> std::result::Result<CacheKey, MalformedRequest> {
        host_key(headers)?;
        let key = CacheKey::new(raw_key)?;
        if *method == Method::PUT || *method == Method::PATCH {
            parse_ttl(headers)?;
        }
        Ok(key)
    }

    /// Validate an incoming peer request. Checks run in wire order: host key,
    /// cache key, TTL, body size, then patch decoding.
    pub fn from_request(
        method: &Method,
        raw_key: &str,
        headers: &HeaderMap,
        body: Bytes,
        max_object_size: usize,
    ) -> std::result::Result<Self, MalformedRequest> {
        let key = Self::check_envelope(method, raw_key, headers)?;
        match *method {
            Method::GET => Ok(RemoteCommand::Get { key }),
            Method::DELETE => Ok(RemoteCommand::Delete { key }),
            Method::PUT | Method::PATCH => {
                let ttl = parse_ttl(headers)?;
                if body.len() > max_object_size {
                    return Err(MalformedRequest::ObjectTooLarge);
                }
                if *method == Method::PUT {
                    return Ok(RemoteCommand::Put {
                        key,
                        value: body,
                        ttl,
                    });
                }
                let patch = PatchOperation::decode(&body)
                    .map_err(|_| MalformedRequest::PatchUndecodable)?;
                Ok(RemoteCommand::Patch { key, patch, ttl })
            }
            _ => Err(MalformedRequest::MethodNotAllowed),
        }
    }

    /// Carry out this command against the local store
    pub fn execute_local(self, store: &LocalStore) -> Result<RemoteOutcome> {
        match self {
            RemoteCommand::Get { key } => Ok(RemoteOutcome::Value(store.get(&key))),
            RemoteCommand::Put { key, value, ttl } => {
                store.put(key, value, ttl);
                Ok(RemoteOutcome::Stored)
            }
            RemoteCommand::Patch { key, patch, ttl } => {
                store.patch(&key, &patch, ttl).map(RemoteOutcome::Patched)
            }
            RemoteCommand::Delete { key } => {
                store.remove(&key);
                Ok(RemoteOutcome::Removed)
            }
        }
    }

    pub fn build_request(
        &self,
        client: &reqwest::Client,
        peer: SocketAddr,
        host_key: &str,
        trace_id: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let request = client
            .request(self.method(), object_url(peer, self.key())?)
            .header(HOST_KEY_HEADER, host_key)
            .header(TRACE_ID_HEADER, trace_id);
        let request = match self {
            RemoteCommand::Get { .. } | RemoteCommand::Delete { .. } => request,
            RemoteCommand::Put { value, ttl, .. } => request
                .header(TTL_HEADER, ttl_header_secs(*ttl))
                .body(value.clone()),
            RemoteCommand::Patch { patch, ttl, .. } => request
                .header(TTL_HEADER, ttl_header_secs(*ttl))
                .body(patch.encode()?),
        };
        Ok(request)
    }

    /// Interpret a peer's response. Any status outside the contract for
    /// this command means the peer rejected it.
    pub fn decode_response(
        &self,
        peer: SocketAddr,
        status: StatusCode,
        body: Bytes,
    ) -> Result<RemoteOutcome> {
        match (self, status) {
            (RemoteCommand::Get { .. }, StatusCode::OK) => Ok(RemoteOutcome::Value(Some(body))),
            (RemoteCommand::Get { .. }, StatusCode::NOT_FOUND) => Ok(RemoteOutcome::Value(None)),
            (RemoteCommand::Put { .. }, status) if status.is_success() => Ok(RemoteOutcome::Stored),
            (RemoteCommand::Patch { .. }, StatusCode::OK) => Ok(RemoteOutcome::Patched(body)),
            (RemoteCommand::Delete { .. }, status) if status.is_success() => {
                Ok(RemoteOutcome::Removed)
            }
            (command, status) => {
                tracing::warn!(
                    "Peer {} rejected {} {} with {}: {}",
                    peer,
                    command.method(),
                    command.key(),
                    status,
                    String::from_utf8_lossy(&body)
                );
                Err(DipperError::PeerRejected {
                    peer,
                    status: status.as_u16(),
                })
            }
        }
    }
}

impl IntoResponse for RemoteOutcome {
    fn into_response(self) -> Response {
        let octets = [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        )];
        match self {
            RemoteOutcome::Value(Some(value)) | RemoteOutcome::Patched(value) => {
                (StatusCode::OK, octets, value).into_response()
            }
            RemoteOutcome::Value(None) => StatusCode::NOT_FOUND.into_response(),
            RemoteOutcome::Stored => StatusCode::ACCEPTED.into_response(),
            RemoteOutcome::Removed => StatusCode::NO_CONTENT.into_response(),
        }
    }
}
