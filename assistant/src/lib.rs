// Campus assistant: conversational RAG API over an institutional document collection

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod llm;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rag;

#[cfg(test)]
pub(crate) mod testing;
