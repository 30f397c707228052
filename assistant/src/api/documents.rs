use std::time::Instant;

use tracing::info;
use warp::{Rejection, Reply};

use super::AppState;
use crate::error::ApiError;
use crate::models::{DocumentsRequest, DocumentsResponse};

pub async fn handle_recuperar_documentos(
    request: DocumentsRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    info!("Retrieving documents for: {}", request.query);
    let started = Instant::now();

    let result = state.orchestrator.retrieve_documents(&request.query).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    state
        .metrics
        .record_request("recuperar_documentos", outcome, started.elapsed());

    let documentos = result.map_err(|e| warp::reject::custom(ApiError::from(e)))?;
    Ok(warp::reply::json(&DocumentsResponse { documentos }))
}
