//! Index synchronization and query engine.
//!
//! # Architecture
//!
//! - `registry`: store snapshot and path -> id mapping
//! - `ids`: identifier allocation for new entries
//! - `sync`: reconciles a directory listing against a snapshot
//! - `dedup`: plans and applies duplicate removal
//! - `query`: text search with offset pagination

mod dedup;
mod ids;
mod query;
mod registry;
mod sync;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use dedup::{DedupSweeper, DuplicateGroup, SweepOutcome, SweepPlan};
pub use ids::IdAllocator;
pub use query::{QueryEngine, QueryError, QueryHit, QueryResult};
pub use registry::{PathRegistry, StoreSnapshot};
pub use sync::{FailedPath, SyncEngine, SyncFailure, SyncReport};

/// What to do with a listing path that is already in the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResightPolicy {
    /// Re-embed and overwrite the stored entry
    #[default]
    Refresh,
    /// Leave the stored entry untouched
    Skip,
}

/// How new entry ids are minted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdStrategy {
    /// SHA-256 of the image path
    #[default]
    ContentHash,
    /// Listing position plus the number of ids already stored
    Sequential,
}

/// Key used to group stored entries when sweeping duplicates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DedupKey {
    /// File name only: `/a/cat.jpg` and `/b/cat.jpg` are duplicates
    #[default]
    Basename,
    FullPath,
}

impl DedupKey {
    /// Grouping key for `path`, or `None` when the path yields no usable key.
    pub fn key_for(&self, path: &str) -> Option<String> {
        match self {
            DedupKey::Basename => std::path::Path::new(path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .filter(|name| !name.is_empty()),
            DedupKey::FullPath => Some(path.to_string()).filter(|p| !p.is_empty()),
        }
    }
}
