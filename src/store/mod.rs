//! Vector store collaborators.
//!
//! The core talks to the store only through [`VectorStore`]. All list-valued
//! fields returned by the store are index-aligned; callers rely on that.
//!
//! - `chroma`: HTTP client for a Chroma server (production)
//! - `memory`: in-process brute-force store

mod chroma;
mod memory;

use serde::{Deserialize, Serialize};

pub use chroma::ChromaStore;
pub use memory::MemoryStore;

/// Metadata attached to a stored entry.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding the image path.
pub const PATH_KEY: &str = "path";

/// Build the metadata written for an image path. Updates overwrite it whole.
pub fn path_metadata(path: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(PATH_KEY.to_string(), serde_json::Value::String(path.to_string()));
    meta
}

/// Read a non-empty `path` out of optional metadata.
pub fn metadata_path(meta: Option<&Metadata>) -> Option<&str> {
    meta.and_then(|m| m.get(PATH_KEY))
        .and_then(|v| v.as_str())
        .filter(|p| !p.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode store response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("store response fields are not index-aligned: {0}")]
    Misaligned(String),

    #[error("invalid store request: {0}")]
    InvalidRequest(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

/// Fields a `get`/`query` call should return alongside ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Include {
    Embeddings,
    Metadatas,
    Documents,
    Distances,
}

#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    pub include: Vec<Include>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl GetRequest {
    /// Everything needed to reconcile a directory against the store.
    pub fn snapshot() -> Self {
        Self {
            include: vec![Include::Metadatas, Include::Embeddings],
            ..Default::default()
        }
    }

    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            include: vec![Include::Metadatas],
            limit: Some(limit),
            offset: Some(offset),
        }
    }
}

/// Result of a `get` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    pub ids: Vec<String>,
    #[serde(default)]
    pub embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    pub metadatas: Option<Vec<Option<Metadata>>>,
    #[serde(default)]
    pub documents: Option<Vec<Option<String>>>,
}

/// Result of a `query` call: one inner list per query embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub ids: Vec<Vec<String>>,
    #[serde(default)]
    pub distances: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    pub metadatas: Option<Vec<Vec<Option<Metadata>>>>,
}

/// Opaque vector store holding one collection.
///
/// Implementations open (get-or-create) their collection on construction.
pub trait VectorStore: Send + Sync {
    fn get(&self, request: &GetRequest) -> Result<GetResult, StoreError>;

    fn add(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError>;

    fn update(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError>;

    fn delete(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Nearest neighbours of each query embedding, ascending distance.
    fn query(
        &self,
        query_embeddings: &[Vec<f32>],
        n_results: usize,
    ) -> Result<QueryResponse, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

/// Reject write batches whose parallel lists disagree in length.
pub(crate) fn check_aligned(
    ids: &[String],
    embeddings: &[Vec<f32>],
    metadatas: &[Metadata],
) -> Result<(), StoreError> {
    if ids.len() != embeddings.len() || ids.len() != metadatas.len() {
        return Err(StoreError::InvalidRequest(format!(
            "{} ids, {} embeddings, {} metadatas",
            ids.len(),
            embeddings.len(),
            metadatas.len()
        )));
    }
    Ok(())
}
