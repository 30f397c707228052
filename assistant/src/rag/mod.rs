// RAG pipeline: vector store adapter, retriever, prompt assembly, orchestrator

pub mod orchestrator;
pub mod prompt;
pub mod retriever;
pub mod store;

pub use orchestrator::{OrchestratorSettings, QueryOrchestrator};
pub use prompt::PromptAssembler;
pub use retriever::Retriever;
pub use store::{HttpVectorStore, VectorStore};
