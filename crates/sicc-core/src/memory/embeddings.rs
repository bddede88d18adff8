//! Text Embeddings
//!
//! The memory store only needs `embed(text) -> fixed-length vector`. Two
//! implementations are provided:
//!
//! - [`HashingEmbedder`]: deterministic feature hashing of word tokens and
//!   character trigrams. No model download, always available.
//! - `FastEmbedder` (feature `embeddings`): local all-MiniLM-L6-v2 inference
//!   through `fastembed`.
//!
//! Every vector leaving an embedder is L2-normalized.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

#[cfg(feature = "embeddings")]
use crate::error::SiccError;
use crate::error::SiccResult;

/// Embedding dimensions for all-MiniLM-L6-v2
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Text embedding collaborator
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder returns
    fn dimensions(&self) -> usize;

    /// Embed a single text into an L2-normalized vector
    async fn embed(&self, text: &str) -> SiccResult<Vec<f32>>;
}

/// Compute cosine similarity between two vectors
///
/// Returns a value between -1.0 and 1.0; mismatched lengths and zero
/// vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Scale a vector to unit length in place; returns false for a zero vector
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    let norm = vector
        .iter()
        .map(|x| (*x as f64).powi(2))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for x in vector.iter_mut() {
        *x = (*x as f64 / norm) as f32;
    }
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Hashing embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic feature-hashing embedder
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIMENSIONS)
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous embedding, shared by the async trait impl
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut acc = vec![0.0f64; self.dimensions];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut acc, "w", word, 1.0);

            let padded: Vec<char> = format!("#{}#", word).chars().collect();
            for window in padded.windows(3) {
                let gram: String = window.iter().collect();
                self.add_feature(&mut acc, "g", &gram, 0.5);
            }
        }

        let norm = acc.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm == 0.0 {
            // Text without alphanumerics: a unit vector keyed by the raw text
            let (index, _) = self.bucket("raw", text);
            acc[index] = 1.0;
        } else {
            for x in acc.iter_mut() {
                *x /= norm;
            }
        }

        acc.into_iter().map(|x| x as f32).collect()
    }

    fn add_feature(&self, acc: &mut [f64], kind: &str, feature: &str, weight: f64) {
        let (index, positive) = self.bucket(kind, feature);
        acc[index] += if positive { weight } else { -weight };
    }

    fn bucket(&self, kind: &str, feature: &str) -> (usize, bool) {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(b":");
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(bytes) % self.dimensions as u64) as usize;
        (index, digest[8] & 1 == 0)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> SiccResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// fastembed
// ─────────────────────────────────────────────────────────────────────────────

/// Local all-MiniLM-L6-v2 embedder, loaded lazily on first use
#[cfg(feature = "embeddings")]
pub struct FastEmbedder {
    model: std::sync::Arc<tokio::sync::RwLock<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "embeddings")]
impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "embeddings")]
impl FastEmbedder {
    pub fn new() -> Self {
        Self {
            model: std::sync::Arc::new(tokio::sync::RwLock::new(None)),
        }
    }

    async fn ensure_model(&self) -> SiccResult<()> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        if self.model.read().await.is_some() {
            return Ok(());
        }

        let mut model_guard = self.model.write().await;
        if model_guard.is_some() {
            return Ok(());
        }

        tracing::info!("Loading embedding model: all-MiniLM-L6-v2");
        let start = std::time::Instant::now();

        let mut init_options = InitOptions::default();
        init_options.model_name = EmbeddingModel::AllMiniLML6V2;
        init_options.show_download_progress = false;

        let model = TextEmbedding::try_new(init_options).map_err(|e| {
            SiccError::Other(anyhow::anyhow!("failed to load embedding model: {}", e))
        })?;

        tracing::info!(elapsed = ?start.elapsed(), "Embedding model loaded");

        *model_guard = Some(model);
        Ok(())
    }
}

#[cfg(feature = "embeddings")]
#[async_trait]
impl Embedder for FastEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> SiccResult<Vec<f32>> {
        self.ensure_model().await?;

        let model_guard = self.model.read().await;
        let model = model_guard
            .as_ref()
            .ok_or_else(|| SiccError::Other(anyhow::anyhow!("embedding model not initialized")))?;

        let mut vector = model
            .embed(vec![text], None)
            .map_err(|e| SiccError::Other(anyhow::anyhow!("failed to generate embedding: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| SiccError::Other(anyhow::anyhow!("no embedding generated")))?;

        if !l2_normalize(&mut vector) {
            return Err(SiccError::Other(anyhow::anyhow!(
                "embedding model returned a zero vector"
            )));
        }
        Ok(vector)
    }
}
