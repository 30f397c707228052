use std::sync::Arc;

use warp::{Filter, Rejection, Reply};

use crate::db::ConsultationLog;
use crate::error::handle_rejection;
use crate::health::HealthChecker;
use crate::metrics::Metrics;
use crate::middleware::{self, RateLimiter};
use crate::rag::QueryOrchestrator;

mod documents;
mod monitoring;
mod query;

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<QueryOrchestrator>,
    pub health: Arc<HealthChecker>,
    pub metrics: Metrics,
    pub consultations: Option<ConsultationLog>,
    pub limiter: Option<Arc<RateLimiter>>,
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(monitoring::handle_health);

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(monitoring::handle_metrics);

    let consultar_route = warp::path("consultar")
        .and(warp::path::end())
        .and(warp::post())
        .and(middleware::rate_limit(state.limiter.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(query::handle_consultar);

    let documents_route = warp::path("recuperar_documentos")
        .and(warp::path::end())
        .and(warp::post())
        .and(middleware::rate_limit(state.limiter.clone()))
        .and(json_body())
        .and(with_state(state))
        .and_then(documents::handle_recuperar_documentos);

    health_route
        .or(metrics_route)
        .or(consultar_route)
        .or(documents_route)
        .recover(handle_rejection)
        .with(middleware::cors())
        .with(warp::log("campus_assistant::api"))
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::testing::{test_state, FakeModel, FakeStore};
    use serde_json::{json, Value};

    fn body(response: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn consultar_returns_reply() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            FakeStore::with_scores(&[("Inscripción: DNI, título secundario y foto.", 0.8)]),
            FakeModel::replying(&["Necesitás DNI, título secundario y una foto."]),
            dir.path(),
        );
        let api = routes(state.clone());

        let response = warp::test::request()
            .method("POST")
            .path("/consultar")
            .json(&json!({"question": "¿Cuáles son los requisitos de inscripción?", "history": []}))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 200);
        let reply = body(&response);
        assert!(!reply["reply"].as_str().unwrap().is_empty());
        assert_eq!(state.metrics.requests_total("consultar", "ok"), 1);
    }

    #[tokio::test]
    async fn consultar_with_history() {
        let dir = tempfile::tempdir().unwrap();
        let model = FakeModel::replying(&["Sí, también en agosto."]);
        let api = routes(test_state(FakeStore::empty(), model.clone(), dir.path()));

        let response = warp::test::request()
            .method("POST")
            .path("/consultar")
            .json(&json!({
                "question": "¿Y en agosto?",
                "history": [
                    {"role": "user", "content": "¿Hay inscripciones en marzo?"},
                    {"role": "assistant", "content": "Sí, en marzo."}
                ]
            }))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 200);
        assert_eq!(model.prompts()[0].len(), 4);
    }

    #[tokio::test]
    async fn empty_question_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::empty();
        let api = routes(test_state(store.clone(), FakeModel::replying(&[]), dir.path()));

        let response = warp::test::request()
            .method("POST")
            .path("/consultar")
            .json(&json!({"question": "", "history": []}))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 400);
        assert_eq!(body(&response)["code"], "validation_error");
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let api = routes(test_state(FakeStore::empty(), FakeModel::replying(&[]), dir.path()));

        let response = warp::test::request()
            .method("POST")
            .path("/consultar")
            .json(&json!({"question": "hola", "history": [{"role": "system", "content": "x"}]}))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 400);
        assert_eq!(body(&response)["code"], "validation_error");
    }

    #[tokio::test]
    async fn store_outage_is_500_retrieval_error() {
        let dir = tempfile::tempdir().unwrap();
        let api = routes(test_state(FakeStore::unavailable(), FakeModel::replying(&[]), dir.path()));

        let response = warp::test::request()
            .method("POST")
            .path("/consultar")
            .json(&json!({"question": "hola"}))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 500);
        assert_eq!(body(&response)["code"], "retrieval_error");
    }

    #[tokio::test]
    async fn provider_rate_limit_is_429() {
        let dir = tempfile::tempdir().unwrap();
        let rate_limited = || LlmError::RateLimited {
            message: "slow down".into(),
            retry_after: None,
        };
        let model = FakeModel::scripted(vec![Err(rate_limited()), Err(rate_limited()), Err(rate_limited())]);
        let api = routes(test_state(FakeStore::empty(), model, dir.path()));

        let response = warp::test::request()
            .method("POST")
            .path("/consultar")
            .json(&json!({"question": "hola"}))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 429);
        assert_eq!(body(&response)["code"], "rate_limited");
    }

    #[tokio::test]
    async fn generation_failure_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let model = FakeModel::scripted(vec![Err(LlmError::EmptyResponse)]);
        let api = routes(test_state(FakeStore::empty(), model, dir.path()));

        let response = warp::test::request()
            .method("POST")
            .path("/consultar")
            .json(&json!({"question": "hola"}))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 500);
        assert_eq!(body(&response)["code"], "generation_error");
    }

    #[tokio::test]
    async fn consultations_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = test_state(FakeStore::empty(), FakeModel::replying(&["ok"]), dir.path());
        let log = ConsultationLog::new(crate::db::memory_pool().await);
        state.consultations = Some(log.clone());
        let api = routes(state);

        for question in ["hola", ""] {
            warp::test::request()
                .method("POST")
                .path("/consultar")
                .json(&json!({"question": question}))
                .reply(&api)
                .await;
        }

        let rows = log.recent(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        let statuses: Vec<&str> = rows.iter().map(|r| r.status.as_str()).collect();
        assert!(statuses.contains(&"answered"));
        assert!(statuses.contains(&"failed"));
    }

    #[tokio::test]
    async fn local_rate_limit_is_429() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = test_state(FakeStore::empty(), FakeModel::replying(&["uno"]), dir.path());
        state.limiter = middleware::rate_limiter(1);
        let api = routes(state);

        let request = || {
            warp::test::request()
                .method("POST")
                .path("/recuperar_documentos")
                .json(&json!({"query": "becas"}))
        };
        assert_eq!(request().reply(&api).await.status(), 200);

        let response = request().reply(&api).await;
        assert_eq!(response.status(), 429);
        assert_eq!(body(&response)["code"], "rate_limited");
    }

    #[tokio::test]
    async fn recuperar_documentos_returns_passages() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::with_scores(&[("Becas de ayuda económica", 0.4), ("Becas de investigación", 0.9)]);
        let api = routes(test_state(store, FakeModel::replying(&[]), dir.path()));

        let response = warp::test::request()
            .method("POST")
            .path("/recuperar_documentos")
            .json(&json!({"query": "becas"}))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 200);
        let documents = body(&response)["documentos"].as_array().unwrap().clone();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0]["content"], "Becas de investigación");
        assert!(documents[0]["metadata"].is_object());
    }

    #[tokio::test]
    async fn recuperar_documentos_rejects_blank_query() {
        let dir = tempfile::tempdir().unwrap();
        let api = routes(test_state(FakeStore::empty(), FakeModel::replying(&[]), dir.path()));

        let response = warp::test::request()
            .method("POST")
            .path("/recuperar_documentos")
            .json(&json!({"query": "  "}))
            .reply(&api)
            .await;

        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn health_is_200_even_when_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir");
        let api = routes(test_state(FakeStore::empty(), FakeModel::replying(&[]), &missing));

        let response = warp::test::request().path("/health").reply(&api).await;

        assert_eq!(response.status(), 200);
        let report = body(&response);
        assert_eq!(report["overall_status"], "unhealthy");
        assert_eq!(report["checks"]["database"]["path_writable"], false);
        assert!(report["timestamp"].is_string());
        assert!(report["version"].is_string());
    }

    #[tokio::test]
    async fn health_reports_healthy_storage() {
        let dir = tempfile::tempdir().unwrap();
        let api = routes(test_state(FakeStore::empty(), FakeModel::replying(&[]), dir.path()));

        let response = warp::test::request().path("/health").reply(&api).await;
        let report = body(&response);
        assert_eq!(report["overall_status"], "healthy");
        assert_eq!(report["checks"]["database"]["path_writable"], true);
        assert_eq!(report["checks"]["system"]["status"], "healthy");
    }

    #[tokio::test]
    async fn metrics_exposes_prometheus_text() {
        let dir = tempfile::tempdir().unwrap();
        let api = routes(test_state(FakeStore::empty(), FakeModel::replying(&["ok"]), dir.path()));

        warp::test::request()
            .method("POST")
            .path("/consultar")
            .json(&json!({"question": "hola"}))
            .reply(&api)
            .await;
        let response = warp::test::request().path("/metrics").reply(&api).await;

        assert_eq!(response.status(), 200);
        let text = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(text.contains("assistant_requests_total"));
    }

    #[tokio::test]
    async fn unknown_route_and_wrong_method() {
        let dir = tempfile::tempdir().unwrap();
        let api = routes(test_state(FakeStore::empty(), FakeModel::replying(&[]), dir.path()));

        let response = warp::test::request().path("/nope").reply(&api).await;
        assert_eq!(response.status(), 404);
        assert_eq!(body(&response)["code"], "not_found");

        let response = warp::test::request().method("GET").path("/consultar").reply(&api).await;
        assert_eq!(response.status(), 405);
    }
}
