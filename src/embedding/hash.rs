//! Offline feature-hashing embedder.
//!
//! Each lowercase alphanumeric token is hashed (FNV-1a) into one of `dims`
//! buckets with a hash-derived sign, and the result is L2-normalized. It
//! captures lexical overlap only, but needs no model and no network, and is
//! fully deterministic.

use anyhow::Result;
use async_trait::async_trait;

use super::EmbeddingProvider;

pub const DEFAULT_DIMS: usize = 256;

pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash-v1"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn deterministic_and_normalized() {
        let p = HashProvider::new(64);
        let a = p.embed_one("Graph neural networks");
        let b = p.embed_one("graph NEURAL networks");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn overlap_ranks_above_disjoint() {
        let p = HashProvider::new(DEFAULT_DIMS);
        let q = p.embed_one("protein structure prediction");
        let near = p.embed_one("deep learning for protein structure");
        let far = p.embed_one("medieval trade routes of the baltic");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let p = HashProvider::new(8);
        assert_eq!(p.embed_one("  ... "), vec![0.0; 8]);
    }
}
