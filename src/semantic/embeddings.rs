//! Embedding model wrapper for fastembed.
//!
//! Provides the [`Encoder`] seam the adapter talks to, and its CLIP
//! implementation:
//! - Lazy model loading with configurable cache directory
//! - Image and text towers loaded independently (a query never loads the
//!   image model, an index run never loads the text model)
//! - Batch embedding generation

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use fastembed::{ImageEmbedding, ImageInitOptions, InitOptions, TextEmbedding};
use image::RgbImage;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Degenerate embedding with L2 norm {0}")]
    DegenerateVector(f32),

    #[error("Model returned {got} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

/// An image that already decoded cleanly, with the file bytes it came from.
///
/// Encoders that consume compressed input use `bytes` directly; `pixels` is
/// the 8-bit RGB decode for encoders that work on raw pixels.
pub struct DecodedImage<'a> {
    pub bytes: &'a [u8],
    pub pixels: RgbImage,
}

/// Opaque model producing raw (unnormalized) vectors.
///
/// Implementations return exactly one vector per input, in input order.
pub trait Encoder: Send + Sync {
    fn encode_images(&self, images: &[DecodedImage<'_>]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn encode_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// The pair of fastembed models sharing one embedding space.
#[derive(Debug, Clone)]
struct ModelPair {
    text: fastembed::EmbeddingModel,
    image: fastembed::ImageEmbeddingModel,
}

/// CLIP encoder backed by fastembed's ONNX models.
/// Uses Mutexes because fastembed's embed() requires &mut self.
pub struct ClipEncoder {
    models: ModelPair,
    model_name: String,
    cache_dir: PathBuf,
    download_timeout: Duration,
    text: Mutex<Option<TextEmbedding>>,
    image: Mutex<Option<ImageEmbedding>>,
}

impl ClipEncoder {
    /// Create an encoder for the given model name.
    ///
    /// Nothing is downloaded here; each tower is fetched into
    /// `cache_dir/models` on first use.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let models = Self::parse_model_name(model_name)?;

        Ok(Self {
            models,
            model_name: model_name.to_string(),
            cache_dir: cache_dir.join("models"),
            download_timeout: download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
            text: Mutex::new(None),
            image: Mutex::new(None),
        })
    }

    /// Get the model name
    pub fn name(&self) -> &str {
        &self.model_name
    }

    fn ensure_cache_dir(&self) -> Result<(), EmbeddingError> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })
    }

    fn load_text(&self) -> Result<TextEmbedding, EmbeddingError> {
        self.ensure_cache_dir()?;
        log::info!(
            "Loading text model '{}' (download timeout {}s)",
            self.model_name,
            self.download_timeout.as_secs()
        );
        let options = InitOptions::new(self.models.text.clone())
            .with_cache_dir(self.cache_dir.clone())
            .with_show_download_progress(true);
        TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
    }

    fn load_image(&self) -> Result<ImageEmbedding, EmbeddingError> {
        self.ensure_cache_dir()?;
        log::info!(
            "Loading image model '{}' (download timeout {}s)",
            self.model_name,
            self.download_timeout.as_secs()
        );
        let options = ImageInitOptions::new(self.models.image.clone())
            .with_cache_dir(self.cache_dir.clone())
            .with_show_download_progress(true);
        ImageEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
    }

    /// Parse model name string to the fastembed text/image pair.
    fn parse_model_name(name: &str) -> Result<ModelPair, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b-32" | "clip-vit-b/32" | "vit-b/32" | "clipvitb32" => Ok(ModelPair {
                text: fastembed::EmbeddingModel::ClipVitB32,
                image: fastembed::ImageEmbeddingModel::ClipVitB32,
            }),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: clip-vit-b-32",
                name
            ))),
        }
    }
}

impl Encoder for ClipEncoder {
    fn encode_images(&self, images: &[DecodedImage<'_>]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if images.is_empty() {
            return Ok(vec![]);
        }

        // fastembed decodes on its own, so the original file bytes go in as-is
        let refs: Vec<&[u8]> = images.iter().map(|img| img.bytes).collect();

        let mut guard = self.image.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;
        if guard.is_none() {
            *guard = Some(self.load_image()?);
        }
        let model = guard
            .as_mut()
            .ok_or_else(|| EmbeddingError::InitFailed("image model not loaded".to_string()))?;

        model
            .embed_bytes(&refs, None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }

    fn encode_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut guard = self.text.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;
        if guard.is_none() {
            *guard = Some(self.load_text()?);
        }
        let model = guard
            .as_mut()
            .ok_or_else(|| EmbeddingError::InitFailed("text model not loaded".to_string()))?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}
