//! In-process vector store with brute-force nearest neighbour search.
//!
//! Keeps entries in insertion order so `get` behaves like a remote listing.
//! Distances are squared L2, matching Chroma's default `l2` space.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{
    check_aligned, GetRequest, GetResult, Include, Metadata, QueryResponse, StoreError,
    VectorStore,
};

#[derive(Debug, Clone)]
struct StoredEntry {
    id: String,
    embedding: Vec<f32>,
    metadata: Option<Metadata>,
}

#[derive(Default)]
struct Collection {
    entries: Vec<StoredEntry>,
    /// id -> position in `entries`
    positions: HashMap<String, usize>,
    dimensions: Option<usize>,
}

impl Collection {
    fn check_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<Option<usize>, StoreError> {
        let mut expected = self.dimensions;
        for embedding in embeddings {
            match expected {
                Some(dim) if dim != embedding.len() => {
                    return Err(StoreError::InvalidRequest(format!(
                        "embedding dimension {} does not match collection dimension {dim}",
                        embedding.len()
                    )));
                }
                Some(_) => {}
                None => expected = Some(embedding.len()),
            }
        }
        Ok(expected)
    }

    fn reindex(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.id.clone(), pos))
            .collect();
    }
}

pub struct MemoryStore {
    name: String,
    collection: RwLock<Collection>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collection: RwLock::new(Collection::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert entries with arbitrary (possibly missing) metadata.
    pub fn insert_raw(
        &self,
        id: &str,
        embedding: Vec<f32>,
        metadata: Option<Metadata>,
    ) -> Result<(), StoreError> {
        let mut coll = self.write_lock()?;
        coll.dimensions = coll.check_dimensions(std::slice::from_ref(&embedding))?;
        if coll.positions.contains_key(id) {
            return Err(StoreError::InvalidRequest(format!("id {id} already exists")));
        }
        let pos = coll.entries.len();
        coll.entries.push(StoredEntry {
            id: id.to_string(),
            embedding,
            metadata,
        });
        coll.positions.insert(id.to_string(), pos);
        Ok(())
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, Collection>, StoreError> {
        self.collection
            .read()
            .map_err(|e| StoreError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, Collection>, StoreError> {
        self.collection
            .write()
            .map_err(|e| StoreError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Squared L2 distance.
    fn distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
    }
}

impl VectorStore for MemoryStore {
    fn get(&self, request: &GetRequest) -> Result<GetResult, StoreError> {
        let coll = self.read_lock()?;

        let offset = request.offset.unwrap_or(0);
        let limit = request.limit.unwrap_or(usize::MAX);
        let page: Vec<&StoredEntry> = coll.entries.iter().skip(offset).take(limit).collect();

        let wants = |field| request.include.contains(&field);

        Ok(GetResult {
            ids: page.iter().map(|e| e.id.clone()).collect(),
            embeddings: wants(Include::Embeddings)
                .then(|| page.iter().map(|e| e.embedding.clone()).collect()),
            metadatas: wants(Include::Metadatas)
                .then(|| page.iter().map(|e| e.metadata.clone()).collect()),
            documents: wants(Include::Documents).then(|| vec![None; page.len()]),
        })
    }

    fn add(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError> {
        check_aligned(ids, embeddings, metadatas)?;

        let mut coll = self.write_lock()?;
        let dimensions = coll.check_dimensions(embeddings)?;
        if let Some(id) = ids.iter().find(|id| coll.positions.contains_key(*id)) {
            return Err(StoreError::InvalidRequest(format!("id {id} already exists")));
        }
        let mut batch = HashSet::with_capacity(ids.len());
        if let Some(id) = ids.iter().find(|id| !batch.insert(*id)) {
            return Err(StoreError::InvalidRequest(format!("id {id} repeated in batch")));
        }

        coll.dimensions = dimensions;
        for ((id, embedding), metadata) in ids.iter().zip(embeddings).zip(metadatas) {
            let pos = coll.entries.len();
            coll.entries.push(StoredEntry {
                id: id.clone(),
                embedding: embedding.clone(),
                metadata: Some(metadata.clone()),
            });
            coll.positions.insert(id.clone(), pos);
        }
        Ok(())
    }

    fn update(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError> {
        check_aligned(ids, embeddings, metadatas)?;

        let mut coll = self.write_lock()?;
        let dimensions = coll.check_dimensions(embeddings)?;
        if let Some(id) = ids.iter().find(|id| !coll.positions.contains_key(*id)) {
            return Err(StoreError::InvalidRequest(format!("id {id} does not exist")));
        }

        coll.dimensions = dimensions;
        for ((id, embedding), metadata) in ids.iter().zip(embeddings).zip(metadatas) {
            let pos = coll.positions[id];
            let entry = &mut coll.entries[pos];
            entry.embedding = embedding.clone();
            entry.metadata = Some(metadata.clone());
        }
        Ok(())
    }

    fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut coll = self.write_lock()?;
        coll.entries.retain(|entry| !ids.contains(&entry.id));
        coll.reindex();
        if coll.entries.is_empty() {
            coll.dimensions = None;
        }
        Ok(())
    }

    fn query(
        &self,
        query_embeddings: &[Vec<f32>],
        n_results: usize,
    ) -> Result<QueryResponse, StoreError> {
        let coll = self.read_lock()?;
        if let Some(dim) = coll.dimensions {
            if let Some(bad) = query_embeddings.iter().find(|q| q.len() != dim) {
                return Err(StoreError::InvalidRequest(format!(
                    "query dimension {} does not match collection dimension {dim}",
                    bad.len()
                )));
            }
        }

        let mut response = QueryResponse {
            ids: Vec::with_capacity(query_embeddings.len()),
            distances: Some(Vec::with_capacity(query_embeddings.len())),
            metadatas: Some(Vec::with_capacity(query_embeddings.len())),
        };

        for query in query_embeddings {
            let mut scored: Vec<(f32, &StoredEntry)> = coll
                .entries
                .iter()
                .map(|entry| (Self::distance(query, &entry.embedding), entry))
                .collect();

            // Sort by distance ascending
            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(n_results);

            response.ids.push(scored.iter().map(|(_, e)| e.id.clone()).collect());
            if let Some(distances) = response.distances.as_mut() {
                distances.push(scored.iter().map(|(d, _)| *d).collect());
            }
            if let Some(metadatas) = response.metadatas.as_mut() {
                metadatas.push(scored.iter().map(|(_, e)| e.metadata.clone()).collect());
            }
        }

        Ok(response)
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read_lock()?.entries.len())
    }
}
