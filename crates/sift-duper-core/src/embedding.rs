//! Image embedding collaborator.
//!
//! The core only needs "image path in, fixed-length vector out". Implementations must be
//! callable again after a failure and must not carry state from one call into the next.

use image::imageops::FilterType;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },
}

pub trait Embedder: Send + Sync {
    fn embed(&self, image_path: &Path) -> Result<Vec<f32>, EmbeddingError>;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;
}

/// Grayscale thumbnail embedder: the image is squashed to `side x side` luma pixels and
/// mean-centred, so cosine similarity tracks structure rather than overall brightness.
/// Two trailing components carry the mean brightness and its complement; without them a
/// flat image would embed as a zero vector and never match anything.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailEmbedder {
    side: u32,
}

impl ThumbnailEmbedder {
    pub fn new(side: u32) -> Self {
        Self { side: side.max(2) }
    }
}

impl Default for ThumbnailEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Embedder for ThumbnailEmbedder {
    fn embed(&self, image_path: &Path) -> Result<Vec<f32>, EmbeddingError> {
        let image = image::open(image_path)?;
        let thumb = image
            .resize_exact(self.side, self.side, FilterType::Triangle)
            .to_luma8();
        let values: Vec<f32> = thumb.pixels().map(|p| f32::from(p.0[0]) / 255.0).collect();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let mut vector: Vec<f32> = values.into_iter().map(|v| v - mean).collect();
        vector.extend([mean, 1.0 - mean]);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        (self.side * self.side) as usize + 2
    }
}

/// Cosine of the angle between two vectors. `None` for mismatched lengths, empty input or
/// a zero-norm vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    if a == b {
        return Some(1.0);
    }
    Some((dot / denom).clamp(-1.0, 1.0))
}

/// Cosine similarity mapped onto [0, 1].
pub fn normalized_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    cosine_similarity(a, b).map(|cos| (cos + 1.0) / 2.0)
}
