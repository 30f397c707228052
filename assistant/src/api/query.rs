use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;
use warp::{Rejection, Reply};

use super::AppState;
use crate::db::Consultation;
use crate::error::{ApiError, QueryError};
use crate::models::QueryRequest;

pub async fn handle_consultar(request: QueryRequest, state: AppState) -> Result<impl Reply, Rejection> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();
    info!("Processing consultation [{}]: {}", request_id, request.question);

    let result = state
        .orchestrator
        .answer(&request.question, &request.history)
        .await;
    let elapsed = started.elapsed();

    let error_code = result.as_ref().err().map(QueryError::code);
    state
        .metrics
        .record_request("consultar", error_code.unwrap_or("ok"), elapsed);

    if let Some(log) = &state.consultations {
        let entry = Consultation::new(
            &request.question,
            request.history.len(),
            error_code,
            elapsed.as_millis(),
        );
        if let Err(e) = log.record(&entry).await {
            warn!("Failed to record consultation [{}]: {}", request_id, e);
        }
    }

    match result {
        Ok(reply) => {
            info!("Consultation [{}] answered in {:?}", request_id, elapsed);
            Ok(warp::reply::json(&reply))
        }
        Err(e) => {
            warn!("Consultation [{}] failed ({}): {}", request_id, e.code(), e);
            Err(warp::reject::custom(ApiError::from(e)))
        }
    }
}
