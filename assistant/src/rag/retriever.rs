// Retriever: ranks vector store candidates into the top-k passages

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::store::{ScoredPassage, StoreError, VectorStore};
use crate::models::Passage;

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Passage>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        info!("Retriever: Searching for: {}", query);
        let candidates = self.store.similarity_search(query, k).await?;
        let passages = rank(candidates, k);

        for passage in &passages {
            debug!(metadata = ?passage.metadata, "retrieved passage");
        }
        Ok(passages)
    }

    pub async fn retrieve_many(&self, queries: &[String], k: usize) -> Result<Vec<Passage>, StoreError> {
        if k == 0 || queries.is_empty() {
            return Ok(Vec::new());
        }

        // query order is kept so equal scores favour earlier queries
        let mut candidates = Vec::new();
        for query in queries {
            info!("Retriever: Searching for variant: {}", query);
            candidates.extend(self.store.similarity_search(query, k).await?);
        }
        debug!(queries = queries.len(), candidates = candidates.len(), "merging variant results");

        Ok(rank(candidates, k))
    }
}

fn rank(mut candidates: Vec<ScoredPassage>, k: usize) -> Vec<Passage> {
    // slice::sort_by is stable, so ties fall back to index order
    candidates.sort_by(|a, b| descending(a.score, b.score));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|scored| seen.insert(scored.passage.content.clone()))
        .take(k)
        .map(|scored| scored.passage)
        .collect()
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
