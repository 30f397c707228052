use std::time::Instant;

use warp::{Rejection, Reply};

use super::AppState;
use crate::error::ApiError;

/// Always 200: the report itself carries the status.
pub async fn handle_health(state: AppState) -> Result<impl Reply, Rejection> {
    let started = Instant::now();
    let report = state.health.check().await;
    state.metrics.record_request("health", "ok", started.elapsed());
    Ok(warp::reply::json(&report))
}

pub async fn handle_metrics(state: AppState) -> Result<impl Reply, Rejection> {
    let (buffer, content_type) = state
        .metrics
        .render()
        .map_err(|e| warp::reject::custom(ApiError::InternalError(e.to_string())))?;

    Ok(warp::reply::with_header(buffer, "Content-Type", content_type))
}
