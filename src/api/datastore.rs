//! Peer-facing datastore endpoints. Peers forward operations here for keys
//! this node owns; they always run against the local store.
use axum::{
    body::{self, Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::error::MalformedRequest;
use crate::node::DipperNode;
use crate::protocol::{self, RemoteCommand};

/// Every method on the object path lands here so that unsupported ones get
/// the same validation and rejection as the rest.
pub async fn object(
    State(state): State<DipperNode>,
    method: Method,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let trace_id = protocol::trace_id(&headers);
    let span = tracing::debug_span!("datastore_object", %method, trace_id = %trace_id);
    dispatch(&state, method, &key, &headers, body)
        .instrument(span)
        .await
}

async fn dispatch(
    state: &DipperNode,
    method: Method,
    raw_key: &str,
    headers: &HeaderMap,
    body: Body,
) -> Response {
    let max_object_size = state.max_object_size();
    let body: Bytes = match body::to_bytes(body, max_object_size).await {
        Ok(body) => body,
        Err(err) => {
            tracing::debug!("Stopped reading datastore body: {}", err);
            // header problems still take precedence over the size
            let kind = RemoteCommand::check_envelope(&method, raw_key, headers)
                .err()
                .unwrap_or(MalformedRequest::ObjectTooLarge);
            return reject(&method, kind);
        }
    };

    let command =
        match RemoteCommand::from_request(&method, raw_key, headers, body, max_object_size) {
            Ok(command) => command,
            Err(kind) => return reject(&method, kind),
        };
    match command.execute_local(state.local_store()) {
        Ok(outcome) => outcome.into_response(),
        Err(err) => {
            tracing::error!("Datastore {} on {} failed: {}", method, raw_key, err);
            err.into_response()
        }
    }
}

fn reject(method: &Method, kind: MalformedRequest) -> Response {
    tracing::info!("Rejected datastore {}: {}", method, kind);
    // an unusable key simply has no value to read
    let status = if *method == Method::GET && kind == MalformedRequest::CacheKeyInvalid {
        StatusCode::NOT_FOUND
    } else {
        kind.status_code()
    };
    (status, kind.message()).into_response()
}
