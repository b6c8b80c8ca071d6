//! Process-wide handle tying configuration, the embedding adapter and the
//! vector store together. Built once at startup and shared by the CLI and
//! the HTTP daemon.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::ProgressBar;
use serde::Serialize;

use crate::config::{Config, ConfigError, StoreBackend};
use crate::index::{
    DedupKey, DedupSweeper, QueryEngine, QueryError, QueryResult, ResightPolicy, StoreSnapshot,
    SweepOutcome, SweepPlan, SyncEngine, SyncReport,
};
use crate::listing::{expand_tilde, list_images};
use crate::semantic::{ClipEncoder, EmbeddingAdapter, EmbeddingError};
use crate::store::{
    ChromaStore, GetRequest, Include, MemoryStore, Metadata, StoreError, VectorStore,
};

/// Entries per `list_page` call
pub const PAGE_SIZE: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not list {}: {source}", dir.display())]
    Listing {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One page of raw stored entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImagePage {
    pub ids: Vec<String>,
    pub metadatas: Vec<Option<Metadata>>,
}

/// Per-call overrides for an index run.
#[derive(Default)]
pub struct IndexOptions {
    /// Directory to scan instead of `image_dir`
    pub dir: Option<PathBuf>,
    pub resight: Option<ResightPolicy>,
    pub cancel: Option<Arc<AtomicBool>>,
    pub progress: Option<ProgressBar>,
}

pub struct ImageSearchService {
    config: Config,
    adapter: Arc<EmbeddingAdapter>,
    store: Arc<dyn VectorStore>,
    /// Serializes index runs inside this process
    index_lock: Mutex<()>,
}

impl ImageSearchService {
    pub fn new(config: Config, adapter: Arc<EmbeddingAdapter>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            config,
            adapter,
            store,
            index_lock: Mutex::new(()),
        }
    }

    /// Build the production encoder and open the configured store.
    pub fn from_config(config: Config) -> Result<Self, ServiceError> {
        config.validate()?;

        let encoder = ClipEncoder::new(
            &config.embedding.model,
            config.base_path().to_path_buf(),
            Some(Duration::from_secs(config.embedding.download_timeout_secs)),
        )?;
        let adapter = Arc::new(EmbeddingAdapter::new(
            Arc::new(encoder),
            config.embedding.batch_size,
        ));

        let store: Arc<dyn VectorStore> = match config.store.backend {
            StoreBackend::Chroma => {
                let chroma = ChromaStore::connect(&config.store)?;
                log::info!("using collection '{}'", chroma.collection_name());
                Arc::new(chroma)
            }
            StoreBackend::Memory => {
                log::warn!("using in-memory store, the index is lost on exit");
                Arc::new(MemoryStore::new(&config.store.collection))
            }
        };

        Ok(Self::new(config, adapter, store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sync one directory into the store.
    pub fn index(&self, options: IndexOptions) -> Result<SyncReport, ServiceError> {
        let _guard = self
            .index_lock
            .lock()
            .map_err(|e| ServiceError::Internal(format!("Lock poisoned: {}", e)))?;

        let dir = match options.dir {
            Some(dir) => dir,
            None => expand_tilde(&self.config.image_dir),
        };
        // Stored paths must not depend on how the directory was spelled.
        let dir = std::fs::canonicalize(&dir).map_err(|source| ServiceError::Listing {
            dir: dir.clone(),
            source,
        })?;
        let listing = self.list_dir(&dir)?;
        log::info!("found {} images in {}", listing.len(), dir.display());

        let snapshot = StoreSnapshot::read(self.store.as_ref())?;

        let mut engine = SyncEngine::new(
            self.adapter.clone(),
            self.store.clone(),
            options.resight.unwrap_or(self.config.sync.resight),
            self.config.sync.id_strategy,
        )
        .with_dimension(self.config.embedding.dimension);
        if let Some(cancel) = options.cancel {
            engine = engine.with_cancel(cancel);
        }
        if let Some(progress) = options.progress {
            engine = engine.with_progress(progress);
        }

        Ok(engine.sync(&listing, &snapshot))
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<String>, ServiceError> {
        list_images(dir, &self.config.extensions).map_err(|source| ServiceError::Listing {
            dir: dir.to_path_buf(),
            source,
        })
    }

    pub fn search(&self, text: &str, top_k: usize, offset: usize) -> Result<QueryResult, ServiceError> {
        let engine = QueryEngine::new(self.adapter.clone(), self.store.clone())
            .with_dimension(self.config.embedding.dimension);
        Ok(engine.search(text, top_k, offset)?)
    }

    /// Raw entries `[offset, offset + PAGE_SIZE)` in store order.
    pub fn list_page(&self, offset: usize) -> Result<ImagePage, ServiceError> {
        let result = self.store.get(&GetRequest::page(offset, PAGE_SIZE))?;
        let metadatas = result
            .metadatas
            .unwrap_or_else(|| vec![None; result.ids.len()]);
        Ok(ImagePage {
            ids: result.ids,
            metadatas,
        })
    }

    pub fn plan_dedup(&self, key: Option<DedupKey>) -> Result<SweepPlan, ServiceError> {
        let snapshot = StoreSnapshot::from_get(self.store.get(&GetRequest {
            include: vec![Include::Metadatas],
            ..Default::default()
        })?)?;
        let plan = self.sweeper(key).plan(&snapshot);
        log::info!(
            "{} duplicates in {} groups across {} entries",
            plan.removed.len(),
            plan.groups.len(),
            snapshot.len()
        );
        Ok(plan)
    }

    pub fn apply_dedup<F>(&self, plan: &SweepPlan, confirm: F) -> Result<SweepOutcome, ServiceError>
    where
        F: FnOnce(&SweepPlan) -> bool,
    {
        Ok(self
            .sweeper(None)
            .apply(self.store.as_ref(), plan, confirm)?)
    }

    fn sweeper(&self, key: Option<DedupKey>) -> DedupSweeper {
        DedupSweeper::new(key.unwrap_or(self.config.dedup.key))
    }
}
