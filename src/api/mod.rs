mod access;
mod base;
mod datastore;
mod rate_limits;

use std::borrow::Cow;

use axum::{
    error_handling::HandleErrorLayer, http::StatusCode, middleware, response::IntoResponse,
    routing, Router,
};
use tokio::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

pub mod paths;

pub use rate_limits::{GroupsQuery, TrackRequest, TrackResponse};

use crate::error::Result;
use crate::node::DipperNode;

/// Build the HTTP API: rate limiting endpoints for callers and the datastore
/// endpoints for peers
pub fn api(node: DipperNode) -> Result<Router> {
    // Peer endpoints read bodies up to the configured object size themselves
    let datastore = Router::new()
        .route(paths::datastore::OBJECT, routing::any(datastore::object))
        .layer(middleware::from_fn_with_state(
            node.clone(),
            access::require_allowed_peer,
        ));

    let api = Router::new()
        .route(paths::base::ROOT, routing::get(base::root))
        .route(paths::base::HEALTH, routing::get(base::health))
        .route(paths::base::ABOUT, routing::get(base::about))
        .route(paths::rate_limits::TRACK, routing::post(rate_limits::track_limits))
        .route(paths::rate_limits::QUERY, routing::get(rate_limits::query_limits))
        .merge(datastore)
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(Duration::from_secs(10)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(node);

    Ok(api)
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        );
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Cow::from(format!("Unhandled internal error: {}", error)),
    )
}
