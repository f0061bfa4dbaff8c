//! Deterministic local embedder
//!
//! Each token seeds a PRNG from its SHA-256 digest and contributes one
//! pseudo-random direction; the embedding is the sum. Identical token bags
//! map to identical vectors, and texts sharing vocabulary point the same way.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use super::tokenize::{ensure_min_tokens, tokenize};
use super::Embedder;
use crate::errors::Result;

pub const HASHING_MODEL: &str = "hashing-v1";

pub struct HashingEmbedder {
    dimension: usize,
    min_tokens: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize, min_tokens: usize) -> Self {
        Self { dimension, min_tokens }
    }

    fn token_vector(&self, token: &str, into: &mut [f32]) {
        let seed: [u8; 32] = Sha256::digest(token.as_bytes()).into();
        let mut rng = StdRng::from_seed(seed);
        for slot in into.iter_mut() {
            *slot += rng.gen_range(-1.0f32..1.0f32);
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        ensure_min_tokens(&tokens, self.min_tokens)?;

        let mut vector = vec![0.0f32; self.dimension];
        for token in &tokens {
            self.token_vector(token, &mut vector);
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        HASHING_MODEL
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
