use sha2::{Digest, Sha256};

use super::IdStrategy;

/// Hex characters kept from the path digest.
const HASH_ID_LEN: usize = 32;

/// Mints ids for paths that are new to the store.
#[derive(Debug, Clone, Copy)]
pub enum IdAllocator {
    /// `running_index + offset`, where offset is the snapshot id count
    Sequential { offset: usize },
    /// Truncated SHA-256 of the path
    ContentHash,
}

impl IdAllocator {
    pub fn new(strategy: IdStrategy, id_offset: usize) -> Self {
        match strategy {
            IdStrategy::Sequential => IdAllocator::Sequential { offset: id_offset },
            IdStrategy::ContentHash => IdAllocator::ContentHash,
        }
    }

    /// Id for the path at listing position `running_index`.
    pub fn allocate(&self, running_index: usize, path: &str) -> String {
        match self {
            IdAllocator::Sequential { offset } => (running_index + offset).to_string(),
            IdAllocator::ContentHash => {
                let digest = Sha256::digest(path.as_bytes());
                let mut hex = String::with_capacity(HASH_ID_LEN);
                for byte in digest.iter() {
                    if hex.len() >= HASH_ID_LEN {
                        break;
                    }
                    hex.push_str(&format!("{:02x}", byte));
                }
                hex.truncate(HASH_ID_LEN);
                hex
            }
        }
    }
}
