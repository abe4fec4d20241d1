use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::node::DipperNode;

/// Only allowed peers may reach the datastore endpoints
pub async fn require_allowed_peer(
    State(state): State<DipperNode>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if state.access().is_allowed(peer.ip()) {
        return next.run(request).await;
    }
    tracing::warn!(
        "Denied {} {} from {}",
        request.method(),
        request.uri().path(),
        peer
    );
    (
        StatusCode::UNAUTHORIZED,
        "Host is not allowed to access the datastore",
    )
        .into_response()
}
