pub mod hashed;
#[cfg(feature = "onnx")]
pub mod local;
pub mod worker;

use anyhow::Result;

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Text-to-vector embedding.
///
/// Implementations produce L2-normalized vectors of exactly [`EMBEDDING_DIM`]
/// dimensions, so cosine similarity reduces to a dot product. All methods are
/// synchronous; the [`worker`] module keeps them off the request path.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a unit vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Whether the implementation is fully operational (model loaded).
    fn ready(&self) -> bool {
        true
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Short identifier for health reporting.
    fn name(&self) -> &'static str;
}

/// L2-normalize a vector in place. A zero vector stays zero.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Create an embedding provider from config.
///
/// `"auto"` tries the local sentence-transformer model and quietly falls back
/// to the term-hashing embedder when the model cannot load — search quality
/// degrades but the vector contract holds. `"hashed"` forces the fallback;
/// `"local"` fails hard when the model is unavailable.
pub fn create_provider(config: &crate::config::EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "hashed" => Ok(Box::new(hashed::HashedEmbedder::new())),
        #[cfg(feature = "onnx")]
        "local" => Ok(Box::new(local::LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "onnx"))]
        "local" => anyhow::bail!(
            "embedding provider 'local' requires the onnx build feature"
        ),
        "auto" => {
            #[cfg(feature = "onnx")]
            match local::LocalEmbedder::new(config) {
                Ok(provider) => return Ok(Box::new(provider)),
                Err(e) => {
                    tracing::warn!(error = %e, "local embedding model unavailable, using hashed fallback");
                }
            }
            Ok(Box::new(hashed::HashedEmbedder::new()))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: auto, local, hashed"),
    }
}
