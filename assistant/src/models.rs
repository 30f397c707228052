use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Passage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Human readable provenance, e.g. `reglamento.pdf, p. 3`.
    pub fn source_label(&self) -> Option<String> {
        let source = ["source", "filename", "doc_id"]
            .iter()
            .find_map(|key| self.metadata.get(*key).and_then(Value::as_str))?;

        match self.metadata.get("page").filter(|page| !page.is_null()) {
            Some(Value::String(page)) => Some(format!("{source}, p. {page}")),
            Some(page) => Some(format!("{source}, p. {page}")),
            None => Some(source.to_string()),
        }
    }
}

// API Request/Response models
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub reply: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentsRequest {
    #[serde(alias = "question")]
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentsResponse {
    pub documentos: Vec<Passage>,
}
