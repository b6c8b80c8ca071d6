//! Text-to-image search with offset pagination.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::semantic::{EmbeddingAdapter, EmbeddingError};
use crate::store::{metadata_path, GetRequest, Include, StoreError, VectorStore};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("query embedding has {got} dimensions, collection has {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub id: String,
    pub path: Option<String>,
    pub distance: f32,
    /// Whether `path` names a readable file right now
    pub valid: bool,
}

/// Ranked hits, nearest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryResult {
    pub hits: Vec<QueryHit>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

pub struct QueryEngine {
    adapter: Arc<EmbeddingAdapter>,
    store: Arc<dyn VectorStore>,
    dimension: Option<usize>,
}

impl QueryEngine {
    pub fn new(adapter: Arc<EmbeddingAdapter>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            adapter,
            store,
            dimension: None,
        }
    }

    /// Pin the collection dimension instead of reading it from the store.
    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.dimension = dimension;
        self
    }

    /// Return hits ranked `[offset, offset + top_k)` for `text`.
    pub fn search(&self, text: &str, top_k: usize, offset: usize) -> Result<QueryResult, QueryError> {
        if text.trim().is_empty() {
            return Err(QueryError::InvalidInput("query text is empty".to_string()));
        }
        if top_k == 0 {
            return Err(QueryError::InvalidInput("top_k must be at least 1".to_string()));
        }

        let embedding = self.adapter.embed_query(text)?;

        let expected = match self.dimension {
            Some(dim) => Some(dim),
            None => match self.stored_dimension()? {
                Some(dim) => Some(dim),
                None => {
                    log::debug!("collection is empty, nothing to search");
                    return Ok(QueryResult::default());
                }
            },
        };
        if let Some(expected) = expected {
            if expected != embedding.len() {
                return Err(QueryError::DimensionMismatch {
                    expected,
                    got: embedding.len(),
                });
            }
        }

        let n_results = top_k.saturating_add(offset);
        let response = self.store.query(&[embedding], n_results)?;

        let ids = response.ids.into_iter().next().unwrap_or_default();
        let Some(distances) = response.distances.and_then(|d| d.into_iter().next()) else {
            log::warn!("store returned no distances");
            return Ok(QueryResult::default());
        };
        let Some(metadatas) = response.metadatas.and_then(|m| m.into_iter().next()) else {
            log::warn!("store returned no metadatas");
            return Ok(QueryResult::default());
        };

        let len = ids.len().min(distances.len()).min(metadatas.len());
        if len != ids.len() || len != distances.len() || len != metadatas.len() {
            log::warn!(
                "store returned uneven lists ({} ids, {} distances, {} metadatas), truncating to {len}",
                ids.len(),
                distances.len(),
                metadatas.len()
            );
        }

        let start = offset.min(len);
        let end = offset.saturating_add(top_k).min(len);

        let hits = ids[start..end]
            .iter()
            .zip(&distances[start..end])
            .zip(&metadatas[start..end])
            .map(|((id, distance), meta)| {
                let path = metadata_path(meta.as_ref()).map(|p| p.to_string());
                QueryHit {
                    id: id.clone(),
                    valid: path.as_deref().is_some_and(is_readable_file),
                    path,
                    distance: *distance,
                }
            })
            .collect();

        Ok(QueryResult { hits })
    }

    /// Dimension of one stored embedding, or `None` for an empty collection.
    fn stored_dimension(&self) -> Result<Option<usize>, QueryError> {
        let peek = self.store.get(&GetRequest {
            include: vec![Include::Embeddings],
            limit: Some(1),
            offset: None,
        })?;
        Ok(peek
            .embeddings
            .and_then(|e| e.into_iter().next())
            .map(|e| e.len()))
    }
}

fn is_readable_file(path: &str) -> bool {
    let path = Path::new(path);
    path.is_file() && std::fs::File::open(path).is_ok()
}
