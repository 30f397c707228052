// Query orchestrator: retrieval -> prompt assembly -> generation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use super::prompt::PromptAssembler;
use super::retriever::Retriever;
use super::store::StoreError;
use crate::config::Config;
use crate::error::QueryError;
use crate::llm::{ChatMessage, ChatModel, CompletionParams, LlmError};
use crate::metrics::Metrics;
use crate::models::{Message, Passage, Reply, Role};

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const REWRITE_HISTORY_TURNS: usize = 3;
const REWRITE_MAX_TOKENS: u32 = 256;

const VARIANTS_MAX_TOKENS: u32 = 256;

const REWRITE_INSTRUCTIONS: &str = "Reformulá la pregunta del usuario para que se entienda sin \
el historial de la conversación. La reformulación se usa para buscar documentos en una base \
vectorial. Respondé solamente con la pregunta reformulada.";

const VARIANTS_INSTRUCTIONS: &str = "Generá versiones alternativas de la pregunta del usuario para \
buscar documentos relevantes en una base vectorial desde distintas perspectivas. Escribí una \
versión por línea, sin numeración ni texto adicional.";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retriever_k: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub query_rewrite: bool,
    pub multi_query: bool,
    pub query_variants: usize,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            retriever_k: config.retriever_k,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            request_timeout: config.request_timeout(),
            max_retries: config.llm_max_retries,
            retry_backoff: Duration::from_millis(config.llm_retry_backoff_ms),
            query_rewrite: config.query_rewrite,
            multi_query: config.multi_query,
            query_variants: config.multi_query_variants,
        }
    }
}

pub struct QueryOrchestrator {
    retriever: Retriever,
    llm: Arc<dyn ChatModel>,
    assembler: PromptAssembler,
    settings: OrchestratorSettings,
    upstream: Semaphore,
    metrics: Metrics,
}

impl QueryOrchestrator {
    /// `workers` bounds how many upstream calls (retrieval or generation)
    /// may be in flight at once across all requests.
    pub fn new(
        retriever: Retriever,
        llm: Arc<dyn ChatModel>,
        assembler: PromptAssembler,
        settings: OrchestratorSettings,
        workers: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            retriever,
            llm,
            assembler,
            settings,
            upstream: Semaphore::new(workers.max(1)),
            metrics,
        }
    }

    #[instrument(skip_all, fields(history_len = history.len()))]
    pub async fn answer(&self, question: &str, history: &[Message]) -> Result<Reply, QueryError> {
        validate_question(question)?;
        validate_history(history)?;

        let search_query = if self.settings.query_rewrite && !history.is_empty() {
            self.rewrite_question(question, history).await
        } else {
            question.to_string()
        };

        let passages = self.search(&search_query).await?;
        let prompt = self.assembler.assemble(&passages, history, question);
        if prompt.dropped_turns > 0 {
            info!(
                dropped = prompt.dropped_turns,
                estimated_tokens = prompt.estimated_tokens,
                "history truncated to fit token budget"
            );
        }

        let params = CompletionParams {
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let reply = self.generate(&prompt.messages, params).await?;
        info!(passages = passages.len(), "reply generated");

        Ok(Reply { reply })
    }

    /// Passages for a bare query, without generation.
    #[instrument(skip_all)]
    pub async fn retrieve_documents(&self, query: &str) -> Result<Vec<Passage>, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::Validation("query must not be empty".into()));
        }
        self.search(query).await
    }

    async fn search(&self, query: &str) -> Result<Vec<Passage>, QueryError> {
        let queries = if self.settings.multi_query {
            self.query_variants(query).await
        } else {
            vec![query.to_string()]
        };

        let _permit = self
            .upstream
            .acquire()
            .await
            .map_err(|_| QueryError::Retrieval(StoreError::Unavailable("upstream pool closed".into())))?;

        let passages = match queries.as_slice() {
            [single] => self.retriever.retrieve(single, self.settings.retriever_k).await?,
            many => self.retriever.retrieve_many(many, self.settings.retriever_k).await?,
        };
        Ok(passages)
    }

    /// The query followed by LLM-generated rephrasings. Falls back to the
    /// query alone when generation fails.
    async fn query_variants(&self, query: &str) -> Vec<String> {
        let messages = [
            ChatMessage::system(VARIANTS_INSTRUCTIONS),
            ChatMessage::user(format!(
                "Cantidad de versiones: {}\n\nPregunta: {query}",
                self.settings.query_variants
            )),
        ];
        let params = CompletionParams {
            temperature: 0.0,
            max_tokens: VARIANTS_MAX_TOKENS,
        };

        match self.call_llm(&messages, params).await {
            Ok(text) => {
                let queries = parse_variants(&text, query, self.settings.query_variants);
                info!(variants = queries.len() - 1, "generated query variants");
                queries
            }
            Err(err) => {
                warn!(error = %err, "query variant generation failed, searching with the query alone");
                vec![query.to_string()]
            }
        }
    }

    async fn generate(&self, messages: &[ChatMessage], params: CompletionParams) -> Result<String, QueryError> {
        let mut attempt = 0;
        loop {
            match self.call_llm(messages, params).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt < self.settings.max_retries => {
                    let delay = self.backoff(attempt, err.retry_after());
                    warn!(attempt = attempt + 1, ?delay, error = %err, "transient LLM failure, retrying");
                    self.metrics.record_llm_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(QueryError::Generation(err)),
            }
        }
    }

    async fn call_llm(&self, messages: &[ChatMessage], params: CompletionParams) -> Result<String, LlmError> {
        let _permit = self
            .upstream
            .acquire()
            .await
            .map_err(|_| LlmError::Network("upstream pool closed".into()))?;

        tokio::time::timeout(self.settings.request_timeout, self.llm.complete(messages, params))
            .await
            .map_err(|_| LlmError::Timeout)?
    }

    fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self.settings.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
        exponential.max(retry_after.unwrap_or_default()).min(MAX_BACKOFF)
    }

    /// Best effort: any failure falls back to the original question.
    async fn rewrite_question(&self, question: &str, history: &[Message]) -> String {
        let recent = &history[history.len().saturating_sub(REWRITE_HISTORY_TURNS)..];
        let transcript: Vec<String> = recent
            .iter()
            .map(|m| {
                let speaker = match m.role {
                    Role::User => "usuario",
                    Role::Assistant => "asistente",
                };
                format!("{speaker}: {}", m.content)
            })
            .collect();

        let messages = [
            ChatMessage::system(REWRITE_INSTRUCTIONS),
            ChatMessage::user(format!(
                "Historial:\n{}\n\nPregunta: {question}",
                transcript.join("\n")
            )),
        ];
        let params = CompletionParams {
            temperature: 0.0,
            max_tokens: REWRITE_MAX_TOKENS,
        };

        match self.call_llm(&messages, params).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                info!("Rewrote question for retrieval: {}", rewritten.trim());
                rewritten.trim().to_string()
            }
            Ok(_) => question.to_string(),
            Err(err) => {
                warn!(error = %err, "question rewrite failed, using original question");
                question.to_string()
            }
        }
    }
}

/// One variant per non-empty line, list markers stripped, duplicates and
/// echoes of `original` removed. `original` always comes first.
fn parse_variants(text: &str, original: &str, limit: usize) -> Vec<String> {
    let mut queries = vec![original.to_string()];
    let variants = text
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | '•'))
                .trim()
        })
        .filter(|line| !line.is_empty());

    for variant in variants {
        if queries.len() > limit {
            break;
        }
        if !queries.iter().any(|q| q == variant) {
            queries.push(variant.to_string());
        }
    }
    queries
}

fn validate_question(question: &str) -> Result<(), QueryError> {
    if question.trim().is_empty() {
        return Err(QueryError::Validation("question must not be empty".into()));
    }
    Ok(())
}

fn validate_history(history: &[Message]) -> Result<(), QueryError> {
    match history.iter().position(|m| m.content.trim().is_empty()) {
        Some(index) => Err(QueryError::Validation(format!(
            "history message {index} has empty content"
        ))),
        None => Ok(()),
    }
}
