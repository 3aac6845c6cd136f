//! Deterministic feature-hashing embeddings.
//!
//! Word unigrams and character trigrams are hashed with SHA-256 into a
//! fixed number of signed buckets, then L2-normalized. No model download,
//! no network. Texts sharing vocabulary land close together, which is
//! enough for offline runs and reproducible tests.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;

pub const DEFAULT_DIMS: usize = 512;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

pub struct HashingProvider {
    model_version: String,
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize, model_version: &str) -> Self {
        Self {
            model_version: model_version.to_string(),
            dims: dims.max(1),
        }
    }

    /// Embed synchronously.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut vector, "w", word, WORD_WEIGHT);

            let padded: Vec<char> = format!(" {} ", word).chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, "c", &trigram, TRIGRAM_WEIGHT);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], namespace: &str, feature: &str, weight: f32) {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();

        let bucket = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) % self.dims as u64;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket as usize] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hashing"
    }
    fn model_version(&self) -> &str {
        &self.model_version
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let provider = HashingProvider::new(128, "1");
        let a = provider.embed_sync("Customer Line Items");
        let b = provider.embed_sync("Customer Line Items");
        assert_eq!(a, b);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalized() {
        let provider = HashingProvider::new(256, "1");
        let v = provider.embed_sync("supplier invoice posting");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let provider = HashingProvider::new(32, "1");
        assert!(provider.embed_sync("  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let provider = HashingProvider::new(512, "1");
        let query = provider.embed_sync("customer open items");
        let close = provider.embed_sync("customer line items open and cleared");
        let far = provider.embed_sync("material stock warehouse");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }
}
