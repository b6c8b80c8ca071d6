//! Embedding infrastructure for images and query text.
//!
//! # Architecture
//!
//! - `embeddings`: the [`Encoder`] seam and its fastembed CLIP implementation
//! - `adapter`: decoding, batching and L2 normalization on top of an encoder

mod adapter;
pub mod embeddings;

pub use adapter::{l2_norm, l2_normalize, EmbeddingAdapter, RawImage};
pub use embeddings::{ClipEncoder, DecodedImage, EmbeddingError, Encoder};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "clip-vit-b-32";
