//! Turns raw image bytes and query text into normalized embeddings.
//!
//! Images are decoded one by one so a corrupt file only loses its own slot;
//! text is encoded in fixed-size batches. Every vector leaving this module
//! has unit L2 norm.

use std::sync::Arc;

use image::RgbImage;

use super::embeddings::{DecodedImage, EmbeddingError, Encoder};

/// Vectors with a norm below this are reported instead of divided.
const MIN_NORM: f32 = 1e-6;

/// Undecoded image bytes plus a label used in error messages.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub label: String,
    pub bytes: Vec<u8>,
}

impl RawImage {
    pub fn new(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            bytes,
        }
    }
}

pub struct EmbeddingAdapter {
    encoder: Arc<dyn Encoder>,
    batch_size: usize,
}

impl EmbeddingAdapter {
    pub fn new(encoder: Arc<dyn Encoder>, batch_size: usize) -> Self {
        Self {
            encoder,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Decode to 8-bit RGB, rejecting empty or zero-sized images.
    pub fn decode(raw: &RawImage) -> Result<RgbImage, EmbeddingError> {
        if raw.bytes.is_empty() {
            return Err(EmbeddingError::InvalidImage(format!("{}: file is empty", raw.label)));
        }

        let img = image::load_from_memory(&raw.bytes)
            .map_err(|e| EmbeddingError::InvalidImage(format!("{}: {}", raw.label, e)))?;

        if img.width() == 0 || img.height() == 0 {
            return Err(EmbeddingError::InvalidImage(format!(
                "{}: invalid size {}x{}",
                raw.label,
                img.width(),
                img.height()
            )));
        }

        Ok(img.to_rgb8())
    }

    /// Embed a batch of images. The output is index-aligned with the input;
    /// a failing image yields an `Err` in its own slot only.
    pub fn embed_images(&self, images: &[RawImage]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let mut results: Vec<Option<Result<Vec<f32>, EmbeddingError>>> =
            (0..images.len()).map(|_| None).collect();

        // positions[i] is the input slot of decoded[i]
        let mut positions = Vec::with_capacity(images.len());
        let mut decoded = Vec::with_capacity(images.len());
        for (pos, raw) in images.iter().enumerate() {
            match Self::decode(raw) {
                Ok(pixels) => {
                    positions.push(pos);
                    decoded.push(DecodedImage {
                        bytes: &raw.bytes,
                        pixels,
                    });
                }
                Err(err) => {
                    log::warn!("skipping image: {err}");
                    results[pos] = Some(Err(err));
                }
            }
        }

        for (slots, batch) in positions
            .chunks(self.batch_size)
            .zip(decoded.chunks(self.batch_size))
        {
            match self.encode_checked(batch.len(), || self.encoder.encode_images(batch)) {
                Ok(vectors) => {
                    for (&pos, vector) in slots.iter().zip(vectors) {
                        results[pos] = Some(l2_normalize(vector));
                    }
                }
                Err(err) => {
                    for &pos in slots {
                        results[pos] = Some(Err(err.clone()));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(EmbeddingError::EmbeddingFailed("image was not processed".to_string()))
                })
            })
            .collect()
    }

    /// Embed a single image.
    pub fn embed_image(&self, image: &RawImage) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_images(std::slice::from_ref(image))
            .into_iter()
            .next()
            .unwrap_or_else(|| {
                Err(EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
            })
    }

    /// Embed texts in batches of `batch_size`; output order matches input order.
    pub fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let vectors = self.encode_checked(chunk.len(), || self.encoder.encode_text(chunk))?;
            for vector in vectors {
                out.push(l2_normalize(vector)?);
            }
        }
        Ok(out)
    }

    /// Embed one query string as a single-element batch.
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_text(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn encode_checked<F>(&self, expected: usize, encode: F) -> Result<Vec<Vec<f32>>, EmbeddingError>
    where
        F: FnOnce() -> Result<Vec<Vec<f32>>, EmbeddingError>,
    {
        let vectors = encode()?;
        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length. Near-zero vectors are an error.
pub fn l2_normalize(mut v: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    let norm = l2_norm(&v);
    if !norm.is_finite() || norm < MIN_NORM {
        return Err(EmbeddingError::DegenerateVector(norm));
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(v)
}
