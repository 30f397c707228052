use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_SYSTEM_PROMPT: &str = "Sos el asistente virtual de la Universidad del Chubut. \
Respondé únicamente con la información del contexto provisto y teniendo en cuenta el historial \
de la conversación. Usá un tono formal y profesional. No inventes datos; si el contexto no alcanza \
para responder, indicalo claramente.";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub model_name: String,
    pub embedding_model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub prompt_token_budget: usize,
    pub retriever_k: usize,
    pub embedding_service_url: String,
    pub vector_db_service_url: String,
    pub vector_store_path: String,
    pub database_url: String,
    pub workers: usize,
    pub request_timeout_secs: u64,
    pub llm_max_retries: u32,
    pub llm_retry_backoff_ms: u64,
    pub rate_limit_per_minute: u32,
    pub query_rewrite: bool,
    pub multi_query: bool,
    pub multi_query_variants: usize,
    pub system_prompt: String,
    pub health: HealthThresholds,
    pub environment: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HealthThresholds {
    pub degraded_percent: f32,
    pub critical_percent: f32,
    pub min_free_disk_gb: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_percent: 80.0,
            critical_percent: 90.0,
            min_free_disk_gb: 1.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let max_tokens: u32 = parse(&lookup, "MAX_TOKENS", 5000)?;

        let config = Config {
            port: parse(&lookup, "PORT", 8000)?,
            openai_api_key: lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty()),
            openai_base_url: string("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            model_name: string("MODEL_NAME", "gpt-4o"),
            embedding_model_name: string("EMBEDDING_MODEL_NAME", "text-embedding-3-small"),
            temperature: parse(&lookup, "TEMPERATURE", 0.7)?,
            max_tokens,
            prompt_token_budget: parse(&lookup, "PROMPT_TOKEN_BUDGET", max_tokens as usize)?,
            retriever_k: parse(&lookup, "RETRIEVER_K", 10)?,
            embedding_service_url: string("EMBEDDING_SERVICE_URL", "http://localhost:8002"),
            vector_db_service_url: string("VECTOR_DB_SERVICE_URL", "http://localhost:8003"),
            vector_store_path: string("VECTOR_STORE_PATH", "./data/chroma"),
            database_url: string("DATABASE_URL", "sqlite://./data/sqlite/assistant.db"),
            workers: parse(&lookup, "WORKERS", 4)?,
            request_timeout_secs: parse(&lookup, "REQUEST_TIMEOUT_SECS", 60)?,
            llm_max_retries: parse(&lookup, "LLM_MAX_RETRIES", 2)?,
            llm_retry_backoff_ms: parse(&lookup, "LLM_RETRY_BACKOFF_MS", 500)?,
            rate_limit_per_minute: parse(&lookup, "RATE_LIMIT_PER_MINUTE", 120)?,
            query_rewrite: parse(&lookup, "QUERY_REWRITE", false)?,
            multi_query: parse(&lookup, "MULTI_QUERY", false)?,
            multi_query_variants: parse(&lookup, "MULTI_QUERY_VARIANTS", 3)?,
            system_prompt: string("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
            health: HealthThresholds {
                degraded_percent: parse(&lookup, "HEALTH_DEGRADED_PERCENT", 80.0)?,
                critical_percent: parse(&lookup, "HEALTH_CRITICAL_PERCENT", 90.0)?,
                min_free_disk_gb: parse(&lookup, "HEALTH_MIN_FREE_DISK_GB", 1.0)?,
            },
            environment: string("ENVIRONMENT", "development"),
            log_level: string("LOG_LEVEL", "info"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            bail!("TEMPERATURE must be between 0.0 and 1.0, got {}", self.temperature);
        }
        if self.retriever_k == 0 {
            bail!("RETRIEVER_K must be greater than zero");
        }
        if self.workers == 0 {
            bail!("WORKERS must be greater than zero");
        }
        if self.multi_query && self.multi_query_variants == 0 {
            bail!("MULTI_QUERY_VARIANTS must be greater than zero when MULTI_QUERY is on");
        }
        if self.request_timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        if self.health.degraded_percent > self.health.critical_percent {
            bail!(
                "HEALTH_DEGRADED_PERCENT ({}) cannot exceed HEALTH_CRITICAL_PERCENT ({})",
                self.health.degraded_percent,
                self.health.critical_percent
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
