use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::index::{DedupKey, IdStrategy, ResightPolicy};

const CONFIG_FILE: &str = "config.yaml";

/// Default directory scanned by `index` (relative to home)
const DEFAULT_IMAGE_DIR: &str = "~/Downloads";
/// Default image extensions picked up by the directory lister
const DEFAULT_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

const DEFAULT_STORE_URL: &str = "http://localhost:8000";
const DEFAULT_TENANT: &str = "default_tenant";
const DEFAULT_DATABASE: &str = "default_database";
const DEFAULT_COLLECTION: &str = "image_collection";
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;

const DEFAULT_BATCH_SIZE: usize = 32;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_LISTEN: &str = "127.0.0.1:8001";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// Remote Chroma server
    #[default]
    Chroma,
    /// In-process store, contents are lost on exit
    Memory,
}

/// Vector store connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_url")]
    pub url: String,

    #[serde(default = "default_tenant")]
    pub tenant: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Per-request timeout for store calls
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            tenant: default_tenant(),
            database: default_database(),
            collection: default_collection(),
            timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
        }
    }
}

/// Configuration for the embedding model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name, shared by the image and text encoders
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Number of inputs handed to the model per call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Expected collection dimension. Learned from the store when unset.
    #[serde(default)]
    pub dimension: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            batch_size: DEFAULT_BATCH_SIZE,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            dimension: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub resight: ResightPolicy,
    #[serde(default)]
    pub id_strategy: IdStrategy,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default)]
    pub key: DedupKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Bearer token required by the daemon. `IMGSEEK_AUTH_TOKEN` overrides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            token: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            extensions: default_extensions(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            sync: SyncConfig::default(),
            dedup: DedupConfig::default(),
            server: ServerConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_image_dir() -> String {
    DEFAULT_IMAGE_DIR.to_string()
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_store_url() -> String {
    DEFAULT_STORE_URL.to_string()
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_store_timeout_secs() -> u64 {
    DEFAULT_STORE_TIMEOUT_SECS
}

fn default_embedding_model() -> String {
    crate::semantic::DEFAULT_MODEL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "extensions",
                "at least one image extension is required",
            ));
        }

        let store = &self.store;
        if store.backend == StoreBackend::Chroma {
            url::Url::parse(&store.url)
                .map_err(|err| ConfigError::invalid("store.url", format!("{}: {err}", store.url)))?;
        }
        if store.collection.trim().is_empty() {
            return Err(ConfigError::invalid("store.collection", "must not be empty"));
        }
        if store.timeout_secs == 0 {
            return Err(ConfigError::invalid("store.timeout_secs", "must be greater than 0"));
        }

        let emb = &self.embedding;
        if emb.batch_size == 0 {
            return Err(ConfigError::invalid("embedding.batch_size", "must be greater than 0"));
        }
        if emb.download_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "embedding.download_timeout_secs",
                "must be greater than 0",
            ));
        }
        if emb.dimension == Some(0) {
            return Err(ConfigError::invalid("embedding.dimension", "must be greater than 0"));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing the defaults first if it is missing.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE);
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(base_path).map_err(io_err)?;

        // create new if does not exist
        if !path.exists() {
            let defaults = serde_yml::to_string(&Self::default())?;
            std::fs::write(&path, defaults).map_err(io_err)?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str).map_err(|source| ConfigError::Io { path, source })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Token from `IMGSEEK_AUTH_TOKEN`, falling back to `server.token`.
    pub fn auth_token(&self) -> Option<String> {
        std::env::var("IMGSEEK_AUTH_TOKEN")
            .ok()
            .or_else(|| self.server.token.clone())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert_eq!(config.store.collection, "image_collection");
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.sync.resight, ResightPolicy::Refresh);
        assert_eq!(config.sync.id_strategy, IdStrategy::ContentHash);
        assert_eq!(config.dedup.key, DedupKey::Basename);
        assert_eq!(config.base_path(), dir.path());
    }

    #[test]
    fn test_partial_config_is_filled_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "sync:\n  resight: skip\n  id_strategy: sequential\nstore:\n  backend: memory\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.sync.resight, ResightPolicy::Skip);
        assert_eq!(config.sync.id_strategy, IdStrategy::Sequential);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.url, DEFAULT_STORE_URL);

        // normalized form was written back
        let saved = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("collection: image_collection"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.embedding.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "embedding.batch_size", .. })
        ));
    }

    #[test]
    fn test_bad_store_url_rejected() {
        let mut config = Config::default();
        config.store.url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "store.url", .. })
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "store: [1, 2").unwrap();
        assert!(matches!(
            Config::load_with(dir.path()),
            Err(ConfigError::Malformed(_))
        ));
    }
}
