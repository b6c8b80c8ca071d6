use std::collections::{HashMap, HashSet};

use crate::store::{metadata_path, GetRequest, GetResult, Metadata, StoreError, VectorStore};

/// Point-in-time read of the whole collection.
///
/// `ids`, `embeddings` and `metadatas` are index-aligned. Taken once per
/// sync run and never refreshed while the run is in progress.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub ids: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    pub metadatas: Vec<Option<Metadata>>,
}

impl StoreSnapshot {
    /// Read every entry with its metadata and embedding.
    pub fn read(store: &dyn VectorStore) -> Result<Self, StoreError> {
        Self::from_get(store.get(&GetRequest::snapshot())?)
    }

    /// Validate alignment of a raw `get` result. Missing optional fields are
    /// treated as empty; present fields must match `ids` in length.
    pub fn from_get(result: GetResult) -> Result<Self, StoreError> {
        let len = result.ids.len();

        let embeddings = result.embeddings.unwrap_or_default();
        if !embeddings.is_empty() && embeddings.len() != len {
            return Err(StoreError::Misaligned(format!(
                "{len} ids but {} embeddings",
                embeddings.len()
            )));
        }

        let metadatas = match result.metadatas {
            Some(metas) if metas.len() != len => {
                return Err(StoreError::Misaligned(format!(
                    "{len} ids but {} metadatas",
                    metas.len()
                )));
            }
            Some(metas) => metas,
            None => vec![None; len],
        };

        Ok(Self {
            ids: result.ids,
            embeddings,
            metadatas,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dimension of the stored vectors, taken from the first embedding.
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings.first().map(|e| e.len())
    }

    /// Non-empty `path` of the entry at `pos`.
    pub fn path_at(&self, pos: usize) -> Option<&str> {
        self.metadatas.get(pos).and_then(|m| metadata_path(m.as_ref()))
    }
}

/// Which paths the store already knows, and under which id.
#[derive(Debug, Clone, Default)]
pub struct PathRegistry {
    path_to_id: HashMap<String, String>,
    existing_ids: HashSet<String>,
    id_offset: usize,
    shadowed: usize,
}

impl PathRegistry {
    pub fn build(snapshot: &StoreSnapshot) -> Self {
        let mut path_to_id = HashMap::with_capacity(snapshot.len());
        let mut shadowed = 0;

        for (pos, id) in snapshot.ids.iter().enumerate() {
            let Some(path) = snapshot.path_at(pos) else {
                continue;
            };
            // the first entry in snapshot order owns the path
            if path_to_id.contains_key(path) {
                shadowed += 1;
                continue;
            }
            path_to_id.insert(path.to_string(), id.clone());
        }

        Self {
            path_to_id,
            existing_ids: snapshot.ids.iter().cloned().collect(),
            id_offset: snapshot.len(),
            shadowed,
        }
    }

    pub fn is_known(&self, path: &str) -> bool {
        self.path_to_id.contains_key(path)
    }

    pub fn id_for(&self, path: &str) -> Option<&str> {
        self.path_to_id.get(path).map(|id| id.as_str())
    }

    pub fn known_count(&self) -> usize {
        self.path_to_id.len()
    }

    /// Whether `id` exists anywhere in the snapshot, with or without metadata.
    pub fn id_exists(&self, id: &str) -> bool {
        self.existing_ids.contains(id)
    }

    /// Number of ids in the snapshot, including entries without a path.
    pub fn id_offset(&self) -> usize {
        self.id_offset
    }

    /// Entries whose path was already claimed by an earlier entry.
    pub fn shadowed(&self) -> usize {
        self.shadowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::path_metadata;

    fn snapshot(entries: &[(&str, Option<Metadata>)]) -> StoreSnapshot {
        StoreSnapshot {
            ids: entries.iter().map(|(id, _)| id.to_string()).collect(),
            embeddings: entries.iter().map(|_| vec![1.0, 0.0]).collect(),
            metadatas: entries.iter().map(|(_, m)| m.clone()).collect(),
        }
    }

    #[test]
    fn test_malformed_metadata_counts_toward_offset() {
        let mut no_path = Metadata::new();
        no_path.insert("other".to_string(), serde_json::json!("x"));

        let snap = snapshot(&[
            ("0", Some(path_metadata("/img/a.jpg"))),
            ("1", None),
            ("2", Some(no_path)),
            ("3", Some(path_metadata(""))),
            ("4", Some(path_metadata("/img/b.jpg"))),
        ]);
        let registry = PathRegistry::build(&snap);

        assert_eq!(registry.id_offset(), 5);
        assert_eq!(registry.known_count(), 2);
        assert!(registry.is_known("/img/a.jpg"));
        assert_eq!(registry.id_for("/img/b.jpg"), Some("4"));
        assert!(registry.id_exists("1"));
        assert!(!registry.id_exists("9"));
    }

    #[test]
    fn test_first_entry_owns_duplicate_path() {
        let snap = snapshot(&[
            ("a", Some(path_metadata("/img/x.jpg"))),
            ("b", Some(path_metadata("/img/x.jpg"))),
        ]);
        let registry = PathRegistry::build(&snap);

        assert_eq!(registry.id_for("/img/x.jpg"), Some("a"));
        assert_eq!(registry.shadowed(), 1);
    }

    #[test]
    fn test_from_get_fills_missing_metadatas() {
        let snap = StoreSnapshot::from_get(GetResult {
            ids: vec!["1".to_string(), "2".to_string()],
            ..Default::default()
        })
        .unwrap();

        assert_eq!(snap.metadatas, vec![None, None]);
        assert_eq!(snap.dimension(), None);
        assert_eq!(PathRegistry::build(&snap).id_offset(), 2);
    }

    #[test]
    fn test_from_get_rejects_misaligned() {
        let result = StoreSnapshot::from_get(GetResult {
            ids: vec!["1".to_string(), "2".to_string()],
            embeddings: Some(vec![vec![1.0]]),
            ..Default::default()
        });
        assert!(matches!(result, Err(StoreError::Misaligned(_))));
    }

    #[test]
    fn test_dimension_from_first_embedding() {
        let snap = snapshot(&[("0", Some(path_metadata("/a.jpg")))]);
        assert_eq!(snap.dimension(), Some(2));
    }
}
