//! Shared helpers: a deterministic encoder, store wrappers that count calls
//! or fail on demand, and synthetic PNG files.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::RgbImage;

use crate::config::{Config, StoreBackend};
use crate::semantic::{DecodedImage, EmbeddingAdapter, EmbeddingError, Encoder};
use crate::service::ImageSearchService;
use crate::store::{
    metadata_path, GetRequest, GetResult, MemoryStore, Metadata, QueryResponse, StoreError,
    VectorStore,
};

/// Image vectors come from the mean colour and width; text vectors from length.
pub struct FakeEncoder {
    pub dims: usize,
}

impl Encoder for FakeEncoder {
    fn encode_images(&self, images: &[DecodedImage<'_>]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(images
            .iter()
            .map(|img| {
                let img = &img.pixels;
                let px = img.get_pixel(0, 0).0;
                let mut v = vec![0.0; self.dims];
                v[0] = px[0] as f32 / 255.0 + 0.1;
                v[1] = px[1] as f32 / 255.0;
                v[2] = px[2] as f32 / 255.0;
                v[3] = img.width() as f32 / 100.0;
                v
            })
            .collect())
    }

    fn encode_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0; self.dims];
                v[0] = 1.0;
                v[1] = t.len() as f32 * 0.01;
                v
            })
            .collect())
    }
}

pub fn adapter(dims: usize) -> Arc<EmbeddingAdapter> {
    Arc::new(EmbeddingAdapter::new(Arc::new(FakeEncoder { dims }), 4))
}

/// Forwards to a `MemoryStore` and counts `query` calls.
pub struct CountingStore {
    pub inner: MemoryStore,
    pub queries: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new("test"),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl VectorStore for CountingStore {
    fn get(&self, request: &GetRequest) -> Result<GetResult, StoreError> {
        self.inner.get(request)
    }

    fn add(&self, ids: &[String], embeddings: &[Vec<f32>], metadatas: &[Metadata]) -> Result<(), StoreError> {
        self.inner.add(ids, embeddings, metadatas)
    }

    fn update(&self, ids: &[String], embeddings: &[Vec<f32>], metadatas: &[Metadata]) -> Result<(), StoreError> {
        self.inner.update(ids, embeddings, metadatas)
    }

    fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        self.inner.delete(ids)
    }

    fn query(&self, query_embeddings: &[Vec<f32>], n_results: usize) -> Result<QueryResponse, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(query_embeddings, n_results)
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.inner.count()
    }
}

/// Forwards to a `MemoryStore` but rejects writes for one file name, and
/// optionally every query, with a 503.
pub struct FailingStore {
    pub inner: MemoryStore,
    pub fail_path: Option<String>,
    pub fail_queries: bool,
}

impl FailingStore {
    pub fn new(fail_path: Option<&str>, fail_queries: bool) -> Self {
        Self {
            inner: MemoryStore::new("test"),
            fail_path: fail_path.map(str::to_string),
            fail_queries,
        }
    }

    fn check_write(&self, metadatas: &[Metadata]) -> Result<(), StoreError> {
        let Some(suffix) = &self.fail_path else {
            return Ok(());
        };
        if metadatas
            .iter()
            .any(|m| metadata_path(Some(m)).is_some_and(|p| p.ends_with(suffix.as_str())))
        {
            return Err(unavailable());
        }
        Ok(())
    }
}

fn unavailable() -> StoreError {
    StoreError::Status {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

impl VectorStore for FailingStore {
    fn get(&self, request: &GetRequest) -> Result<GetResult, StoreError> {
        self.inner.get(request)
    }

    fn add(&self, ids: &[String], embeddings: &[Vec<f32>], metadatas: &[Metadata]) -> Result<(), StoreError> {
        self.check_write(metadatas)?;
        self.inner.add(ids, embeddings, metadatas)
    }

    fn update(&self, ids: &[String], embeddings: &[Vec<f32>], metadatas: &[Metadata]) -> Result<(), StoreError> {
        self.check_write(metadatas)?;
        self.inner.update(ids, embeddings, metadatas)
    }

    fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        self.inner.delete(ids)
    }

    fn query(&self, query_embeddings: &[Vec<f32>], n_results: usize) -> Result<QueryResponse, StoreError> {
        if self.fail_queries {
            return Err(unavailable());
        }
        self.inner.query(query_embeddings, n_results)
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.inner.count()
    }
}

/// Write a solid-colour PNG and return its canonical path as a string.
pub fn write_png(dir: &Path, name: &str, width: u32, color: [u8; 3]) -> String {
    let path = dir.join(name);
    RgbImage::from_pixel(width, 8, image::Rgb(color))
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    std::fs::canonicalize(&path)
        .unwrap()
        .to_string_lossy()
        .into_owned()
}

pub fn config_for(image_dir: &Path) -> Config {
    let mut config = Config::default();
    config.image_dir = image_dir.to_string_lossy().into_owned();
    config.store.backend = StoreBackend::Memory;
    config
}

pub fn service(
    image_dir: &Path,
    store: Arc<dyn VectorStore>,
    dims: usize,
) -> ImageSearchService {
    ImageSearchService::new(config_for(image_dir), adapter(dims), store)
}
