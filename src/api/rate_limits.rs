use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::limiters::RateLimitList;
use crate::node::DipperNode;

/// A request to be accounted against the caller's limits
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TrackRequest {
    #[serde(default)]
    pub groups: Vec<String>,
    pub uri: String,
    pub method: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackResponse {
    pub subject: String,
    pub allowed: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GroupsQuery {
    /// Comma-separated caller groups
    #[serde(default)]
    pub groups: Option<String>,
}

impl GroupsQuery {
    fn groups(&self) -> Vec<String> {
        self.groups
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// 200 when allowed; over-limit callers get 429 with Retry-After
#[instrument(skip(state), level = "debug")]
pub async fn track_limits(
    Path(subject): Path<String>,
    State(state): State<DipperNode>,
    Json(request): Json<TrackRequest>,
) -> Result<Json<TrackResponse>> {
    state
        .limits()
        .track_limits(&subject, &request.groups, &request.uri, &request.method)
        .await?
        .into_result()?;
    Ok(Json(TrackResponse {
        subject,
        allowed: true,
    }))
}

#[instrument(skip(state), level = "debug")]
pub async fn query_limits(
    Path(subject): Path<String>,
    Query(query): Query<GroupsQuery>,
    State(state): State<DipperNode>,
) -> Result<Json<RateLimitList>> {
    state
        .limits()
        .query_limits(&subject, &query.groups())
        .await
        .map(Json)
}
