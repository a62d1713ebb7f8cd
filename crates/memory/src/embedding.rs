//! Embedding generation for vector search.
//!
//! Three providers sit behind the [`Embedder`] trait:
//!
//! - [`OpenAiEmbedder`]: the `/v1/embeddings` endpoint (production default)
//! - [`FastEmbedder`]: local ONNX models via fastembed (`fastembed` feature)
//! - [`HashingEmbedder`]: deterministic feature hashing, no network; used by
//!   tests and offline runs

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::MemoryError;
use crate::types::EmbeddingConfig;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
    fn dimension(&self) -> usize;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f64::from(dot / (norm_a * norm_b))
}

/// Feature-hashing embedder.
///
/// Each lowercase word (and each non-ASCII character, so CJK text still
/// produces features) is hashed into a signed bucket; the vector is then
/// L2-normalised. Identical texts embed identically.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn features(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut features = Vec::new();
        for word in lower.split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            if word.is_ascii() {
                features.push(word.to_string());
            } else {
                features.extend(word.chars().map(String::from));
            }
        }
        features
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for feature in Self::features(text) {
            let mut hasher = DefaultHasher::new();
            feature.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: Option<String>,
        model: String,
        dimension: usize,
        api_key: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            dimension,
            api_key,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut request = self.http_client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(format!("Embedding request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!(
                "Embedding API error {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(format!("Invalid embedding response: {e}")))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::Embedding("Empty embedding result".into()))?;

        debug!(dimension = embedding.len(), "Generated embedding");
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(feature = "fastembed")]
pub use local::FastEmbedder;

#[cfg(feature = "fastembed")]
mod local {
    use std::sync::Arc;

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use once_cell::sync::OnceCell;
    use tokio::task;
    use tracing::{debug, info, instrument};

    use super::Embedder;
    use crate::error::MemoryError;

    /// Local embedding model, lazily loaded on first use.
    pub struct FastEmbedder {
        model_name: EmbeddingModel,
        dimension: usize,
        model: OnceCell<Arc<TextEmbedding>>,
    }

    impl FastEmbedder {
        pub fn from_model_str(model_name: &str) -> Result<Self, MemoryError> {
            let (model, dimension) = match model_name {
                "all-MiniLM-L6-v2" | "AllMiniLML6V2" => (EmbeddingModel::AllMiniLML6V2, 384),
                "bge-small-en-v1.5" | "BGESmallENV15" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" | "BGEBaseENV15" => (EmbeddingModel::BGEBaseENV15, 768),
                "multilingual-e5-small" | "MultilingualE5Small" => {
                    (EmbeddingModel::MultilingualE5Small, 384)
                }
                "multilingual-e5-base" | "MultilingualE5Base" => {
                    (EmbeddingModel::MultilingualE5Base, 768)
                }
                _ => {
                    return Err(MemoryError::Embedding(format!(
                        "Unknown embedding model: '{model_name}'"
                    )));
                }
            };
            Ok(Self {
                model_name: model,
                dimension,
                model: OnceCell::new(),
            })
        }

        #[instrument(skip(self))]
        fn get_or_init_model(&self) -> Result<Arc<TextEmbedding>, MemoryError> {
            self.model
                .get_or_try_init(|| {
                    info!(model = ?self.model_name, "Initializing embedding model");
                    let mut options = InitOptions::new(self.model_name.clone());
                    options.show_download_progress = false;
                    let model = TextEmbedding::try_new(options)
                        .map_err(|e| MemoryError::Embedding(e.to_string()))?;
                    Ok(Arc::new(model))
                })
                .cloned()
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        #[instrument(skip(self, text), fields(text_len = text.len()))]
        async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
            let model = self.get_or_init_model()?;
            let text = text.to_string();

            // fastembed is synchronous
            let embeddings = task::spawn_blocking(move || {
                model
                    .embed(vec![text], None)
                    .map_err(|e| MemoryError::Embedding(e.to_string()))
            })
            .await
            .map_err(|e| MemoryError::Embedding(format!("Blocking task failed: {e}")))??;

            debug!(count = embeddings.len(), "Generated local embedding");
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| MemoryError::Embedding("Empty embedding result".into()))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }
}

pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, MemoryError> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            Ok(Arc::new(OpenAiEmbedder::new(
                config.api_url.clone(),
                config.model.clone(),
                config.dimension,
                api_key,
            )))
        }
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        #[cfg(feature = "fastembed")]
        "fastembed" => Ok(Arc::new(FastEmbedder::from_model_str(&config.model)?)),
        other => Err(MemoryError::Embedding(format!(
            "Unknown embedding provider: {other}"
        ))),
    }
}
