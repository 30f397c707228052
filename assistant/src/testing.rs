// In-memory fakes shared by unit tests

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::api::AppState;
use crate::config::Config;
use crate::db::RelationalStore;
use crate::health::{HealthChecker, SystemProbe, SystemSnapshot};
use crate::llm::{ChatMessage, ChatModel, CompletionParams, LlmError};
use crate::metrics::Metrics;
use crate::models::Passage;
use crate::rag::store::{ScoredPassage, StoreError, VectorStore};
use crate::rag::{OrchestratorSettings, PromptAssembler, QueryOrchestrator, Retriever};

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "ENVIRONMENT" => Some("test".to_string()),
        _ => None,
    })
    .unwrap()
}

pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        retriever_k: 5,
        temperature: 0.2,
        max_tokens: 512,
        request_timeout: Duration::from_secs(5),
        max_retries: 2,
        retry_backoff: Duration::from_millis(1),
        query_rewrite: false,
        multi_query: false,
        query_variants: 3,
    }
}

pub fn orchestrator_with(store: FakeStore, model: FakeModel, settings: OrchestratorSettings) -> QueryOrchestrator {
    QueryOrchestrator::new(
        Retriever::new(Arc::new(store)),
        Arc::new(model),
        PromptAssembler::new("Instrucciones de prueba", 4000),
        settings,
        4,
        Metrics::new().unwrap(),
    )
}

pub fn test_state(store: FakeStore, model: FakeModel, storage_path: &Path) -> AppState {
    let mut config = test_config();
    config.vector_store_path = storage_path.display().to_string();

    let metrics = Metrics::new().unwrap();
    let orchestrator = QueryOrchestrator::new(
        Retriever::new(Arc::new(store)),
        Arc::new(model),
        PromptAssembler::new("Instrucciones de prueba", 4000),
        test_settings(),
        config.workers,
        metrics.clone(),
    );

    AppState {
        orchestrator: Arc::new(orchestrator),
        health: Arc::new(HealthChecker::new(&config, Arc::new(FakeProbe::healthy()), RelationalStore::Disabled)),
        metrics,
        consultations: None,
        limiter: None,
    }
}

#[derive(Default)]
struct StoreState {
    calls: usize,
    queries: Vec<String>,
}

#[derive(Clone)]
pub struct FakeStore {
    entries: Arc<Vec<ScoredPassage>>,
    available: bool,
    honour_k: bool,
    state: Arc<Mutex<StoreState>>,
}

impl FakeStore {
    pub fn with_scores(entries: &[(&str, f32)]) -> Self {
        let entries = entries
            .iter()
            .enumerate()
            .map(|(index, (content, score))| ScoredPassage {
                passage: Passage::new(*content).with_metadata("filename", format!("doc-{index}.pdf")),
                score: *score,
            })
            .collect();
        Self {
            entries: Arc::new(entries),
            available: true,
            honour_k: true,
            state: Arc::default(),
        }
    }

    pub fn empty() -> Self {
        Self::with_scores(&[])
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::empty()
        }
    }

    /// Returns every entry regardless of the requested `k`.
    pub fn ignoring_k(mut self) -> Self {
        self.honour_k = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }
}

#[async_trait]
impl VectorStore for FakeStore {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>, StoreError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            state.queries.push(query.to_string());
        }
        if !self.available {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        let limit = if self.honour_k { k } else { usize::MAX };
        Ok(self.entries.iter().take(limit).cloned().collect())
    }
}

#[derive(Default)]
struct ModelState {
    script: VecDeque<Result<String, LlmError>>,
    prompts: Vec<Vec<ChatMessage>>,
}

#[derive(Clone)]
pub struct FakeModel {
    state: Arc<Mutex<ModelState>>,
    delay: Duration,
}

impl FakeModel {
    pub fn scripted(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ModelState {
                script: script.into(),
                prompts: Vec::new(),
            })),
            delay: Duration::ZERO,
        }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::scripted(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().prompts.len()
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.state.lock().unwrap().prompts.clone()
    }
}

#[async_trait]
impl ChatModel for FakeModel {
    async fn complete(&self, messages: &[ChatMessage], _params: CompletionParams) -> Result<String, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.prompts.push(messages.to_vec());
        state.script.pop_front().unwrap_or(Err(LlmError::EmptyResponse))
    }
}

pub struct FakeProbe {
    result: std::result::Result<SystemSnapshot, String>,
}

impl FakeProbe {
    pub fn with(snapshot: SystemSnapshot) -> Self {
        Self { result: Ok(snapshot) }
    }

    pub fn healthy() -> Self {
        const GB: u64 = 1024 * 1024 * 1024;
        Self::with(SystemSnapshot {
            cpu_percent: 12.5,
            cpu_count: 8,
            memory_total_bytes: 16 * GB,
            memory_available_bytes: 12 * GB,
            disk_total_bytes: 500 * GB,
            disk_available_bytes: 300 * GB,
            uptime_secs: 36_000,
        })
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl SystemProbe for FakeProbe {
    async fn snapshot(&self, _storage_path: &Path) -> Result<SystemSnapshot> {
        self.result.clone().map_err(|message| anyhow!(message))
    }
}
