//! Reconciles a directory listing against a store snapshot.
//!
//! Each path is processed independently: a failure is recorded in the
//! report and the run moves on. Cancellation is only observed between paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::ProgressBar;
use serde::Serialize;

use super::ids::IdAllocator;
use super::registry::{PathRegistry, StoreSnapshot};
use super::{IdStrategy, ResightPolicy};
use crate::semantic::{EmbeddingAdapter, EmbeddingError, RawImage};
use crate::store::{path_metadata, StoreError, VectorStore};

/// Why a single path could not be synced.
#[derive(Debug, thiserror::Error)]
pub enum SyncFailure {
    #[error("could not read file: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("embedding has {got} dimensions, collection has {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("id {0} is already taken by another entry")]
    IdCollision(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPath {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<FailedPath>,
    pub cancelled: bool,
}

impl SyncReport {
    fn record_failure(&mut self, path: &str, failure: SyncFailure) {
        log::warn!("failed to sync {path}: {failure}");
        self.failed += 1;
        self.failures.push(FailedPath {
            path: path.to_string(),
            reason: failure.to_string(),
        });
    }
}

enum Outcome {
    Added,
    Updated,
    Skipped,
}

/// Per-run bookkeeping layered over the snapshot registry.
struct RunState {
    registry: PathRegistry,
    allocator: IdAllocator,
    /// paths added during this run -> their new id
    minted: HashMap<String, String>,
    minted_ids: HashSet<String>,
    dimension: Option<usize>,
}

impl RunState {
    fn id_for(&self, path: &str) -> Option<&str> {
        self.registry
            .id_for(path)
            .or_else(|| self.minted.get(path).map(|id| id.as_str()))
    }

    fn check_dimension(&mut self, embedding: &[f32]) -> Result<(), SyncFailure> {
        match self.dimension {
            Some(expected) if expected != embedding.len() => Err(SyncFailure::DimensionMismatch {
                expected,
                got: embedding.len(),
            }),
            Some(_) => Ok(()),
            None => {
                log::debug!("collection dimension set to {}", embedding.len());
                self.dimension = Some(embedding.len());
                Ok(())
            }
        }
    }
}

pub struct SyncEngine {
    adapter: Arc<EmbeddingAdapter>,
    store: Arc<dyn VectorStore>,
    resight: ResightPolicy,
    id_strategy: IdStrategy,
    dimension: Option<usize>,
    cancel: Arc<AtomicBool>,
    progress: ProgressBar,
}

impl SyncEngine {
    pub fn new(
        adapter: Arc<EmbeddingAdapter>,
        store: Arc<dyn VectorStore>,
        resight: ResightPolicy,
        id_strategy: IdStrategy,
    ) -> Self {
        Self {
            adapter,
            store,
            resight,
            id_strategy,
            dimension: None,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: ProgressBar::hidden(),
        }
    }

    /// Expected embedding dimension, overriding the one found in the snapshot.
    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.dimension = dimension;
        self
    }

    /// Flag polled between paths; setting it stops the run.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Bring the store in line with `listing`.
    ///
    /// `snapshot` must have been read before the run starts; it is not
    /// refreshed while paths are processed.
    pub fn sync(&self, listing: &[String], snapshot: &StoreSnapshot) -> SyncReport {
        let registry = PathRegistry::build(snapshot);
        if registry.shadowed() > 0 {
            log::warn!(
                "{} stored entries share a path with an earlier entry",
                registry.shadowed()
            );
        }

        let mut state = RunState {
            allocator: IdAllocator::new(self.id_strategy, registry.id_offset()),
            registry,
            minted: HashMap::new(),
            minted_ids: HashSet::new(),
            dimension: self.dimension.or_else(|| snapshot.dimension()),
        };

        log::info!(
            "syncing {} paths against {} stored entries ({:?}, {:?})",
            listing.len(),
            snapshot.len(),
            self.resight,
            self.id_strategy
        );

        let mut report = SyncReport::default();
        self.progress.set_length(listing.len() as u64);

        for (index, path) in listing.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                log::info!("sync cancelled after {index} of {} paths", listing.len());
                report.cancelled = true;
                break;
            }

            self.progress.set_message(path.clone());
            match self.sync_path(index, path, &mut state) {
                Ok(Outcome::Added) => report.added += 1,
                Ok(Outcome::Updated) => report.updated += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(failure) => report.record_failure(path, failure),
            }
            self.progress.inc(1);
        }

        self.progress.finish_and_clear();
        log::info!(
            "sync done: {} added, {} updated, {} skipped, {} failed",
            report.added,
            report.updated,
            report.skipped,
            report.failed
        );
        report
    }

    fn sync_path(
        &self,
        index: usize,
        path: &str,
        state: &mut RunState,
    ) -> Result<Outcome, SyncFailure> {
        if let Some(id) = state.id_for(path).map(|id| id.to_string()) {
            if self.resight == ResightPolicy::Skip {
                return Ok(Outcome::Skipped);
            }
            let embedding = self.embed_path(path, state)?;
            self.store
                .update(&[id], &[embedding], &[path_metadata(path)])?;
            return Ok(Outcome::Updated);
        }

        let id = state.allocator.allocate(index, path);
        if state.registry.id_exists(&id) || state.minted_ids.contains(&id) {
            return Err(SyncFailure::IdCollision(id));
        }

        let embedding = self.embed_path(path, state)?;
        self.store
            .add(std::slice::from_ref(&id), &[embedding], &[path_metadata(path)])?;

        state.minted_ids.insert(id.clone());
        state.minted.insert(path.to_string(), id);
        Ok(Outcome::Added)
    }

    fn embed_path(&self, path: &str, state: &mut RunState) -> Result<Vec<f32>, SyncFailure> {
        let bytes = std::fs::read(path)?;
        let embedding = self.adapter.embed_image(&RawImage::new(path, bytes))?;
        state.check_dimension(&embedding)?;
        Ok(embedding)
    }
}
