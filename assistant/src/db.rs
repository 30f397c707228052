use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{info, warn};
use uuid::Uuid;

pub type DbPool = Pool<Sqlite>;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let filename = options.clone().get_filename();
    if let Some(parent) = filename.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

#[derive(Clone)]
pub enum RelationalStore {
    /// `DATABASE_URL` is empty.
    Disabled,
    /// Configured, but the pool could not be opened.
    Unavailable(String),
    Ready(ConsultationLog),
}

impl RelationalStore {
    /// Never fails: an open error is kept for the health report.
    pub async fn open(database_url: &str, max_connections: u32) -> Self {
        if database_url.trim().is_empty() {
            info!("DATABASE_URL is empty, consultation log disabled");
            return RelationalStore::Disabled;
        }
        match create_pool(database_url, max_connections).await {
            Ok(pool) => {
                info!("Relational store ready");
                RelationalStore::Ready(ConsultationLog::new(pool))
            }
            Err(e) => {
                warn!("Relational store unavailable, consultations will not be logged: {:#}", e);
                RelationalStore::Unavailable(format!("{e:#}"))
            }
        }
    }

    pub fn log(&self) -> Option<ConsultationLog> {
        match self {
            RelationalStore::Ready(log) => Some(log.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Consultation {
    pub id: String,
    pub question: String,
    pub history_len: i64,
    pub status: String,
    pub error_code: Option<String>,
    pub latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl Consultation {
    pub fn new(question: &str, history_len: usize, error_code: Option<&str>, latency_ms: u128) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.to_string(),
            history_len: history_len as i64,
            status: if error_code.is_some() { "failed" } else { "answered" }.to_string(),
            error_code: error_code.map(str::to_string),
            latency_ms: i64::try_from(latency_ms).unwrap_or(i64::MAX),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct ConsultationLog {
    pool: DbPool,
}

impl ConsultationLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, consultation: &Consultation) -> Result<()> {
        sqlx::query(
            "INSERT INTO consultations (id, question, history_len, status, error_code, latency_ms, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&consultation.id)
        .bind(&consultation.question)
        .bind(consultation.history_len)
        .bind(&consultation.status)
        .bind(&consultation.error_code)
        .bind(consultation.latency_ms)
        .bind(consultation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<Consultation>> {
        let rows = sqlx::query_as::<_, Consultation>(
            "SELECT id, question, history_len, status, error_code, latency_ms, created_at
             FROM consultations ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> DbPool {
    create_pool("sqlite::memory:", 1).await.unwrap()
}
