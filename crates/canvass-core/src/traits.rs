use anyhow::Result;
use async_trait::async_trait;

/// Produces fixed-width embeddings for prompt texts.
///
/// The model itself is out of scope — implementations call an external
/// service or wrap a local model. Handles are assumed thread-safe.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize;
}
