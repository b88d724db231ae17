//! Fake implementations for testing.
#![allow(clippy::unwrap_used)]

use crate::traits::EmbeddingProvider;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// FakeEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder for tests: the vector is derived from the text
/// bytes, so equal texts embed identically and distinct texts (almost
/// always) land far apart. Records every call for assertions.
#[derive(Debug)]
pub struct FakeEmbedder {
    dimensions: usize,
    calls: Mutex<Vec<String>>,
}

impl FakeEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.lock().unwrap().push(text.to_owned());

        let mut out = vec![0.0; self.dimensions];
        for (idx, byte) in text.bytes().enumerate() {
            out[idx % self.dimensions] += f32::from(byte) / 255.0;
        }
        // Unit-normalise so cosine similarity behaves like the real model.
        let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut out {
                *v /= norm;
            }
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_texts_embed_identically() {
        let embedder = FakeEmbedder::new(8);
        let a = embedder.embed("how to brew coffee").await.unwrap();
        let b = embedder.embed("how to brew coffee").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(embedder.call_count(), 2);
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let embedder = FakeEmbedder::new(8);
        let v = embedder.embed("anything at all").await.unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
