// Vector store adapter: embedding service + vector index service over HTTP

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::models::Passage;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response from vector store: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::InvalidResponse(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns up to `k` candidates for `query`. Ordering is not guaranteed.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>, StoreError>;
}

pub struct HttpVectorStore {
    client: Client,
    embedding_service_url: String,
    vector_db_service_url: String,
    embedding_model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: [&'a str; 1],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl HttpVectorStore {
    pub fn new(
        client: Client,
        embedding_service_url: impl Into<String>,
        vector_db_service_url: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            embedding_service_url: trim_url(embedding_service_url.into()),
            vector_db_service_url: trim_url(vector_db_service_url.into()),
            embedding_model: embedding_model.into(),
        }
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>, StoreError> {
        let response = self
            .client
            .post(format!("{}/embed", self.embedding_service_url))
            .json(&EmbedRequest {
                texts: [query],
                model: &self.embedding_model,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "embedding service returned {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response.json().await?;
        body.embeddings
            .into_iter()
            .next()
            .filter(|vector| !vector.is_empty())
            .ok_or_else(|| StoreError::InvalidResponse("embedding service returned no vectors".into()))
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>, StoreError> {
        let vector = self.embed(query).await?;

        let response = self
            .client
            .post(format!("{}/index/search", self.vector_db_service_url))
            .json(&SearchRequest { vector: &vector, k })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "vector index returned {}",
                response.status()
            )));
        }

        let body: SearchResponse = response.json().await?;
        debug!(hits = body.results.len(), "vector index search completed");

        body.results.into_iter().map(hit_to_passage).collect()
    }
}

fn hit_to_passage(hit: SearchHit) -> Result<ScoredPassage, StoreError> {
    let mut metadata = hit.metadata;
    let content = match metadata.remove("text") {
        Some(Value::String(text)) => text,
        _ => return Err(StoreError::InvalidResponse("search hit without text".into())),
    };

    Ok(ScoredPassage {
        passage: Passage { content, metadata },
        score: hit.score,
    })
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
