//! Embedding providers and the degradation-aware service wrapper.
//!
//! [`EmbeddingService`] fronts the configured provider with a three-state
//! lifecycle: `loading` until the first embed call probes the provider,
//! then `ready` or permanently `fallback`. In fallback (and with the
//! `disabled` provider) every embed returns `None` and the rest of the
//! engine runs in recency-only mode; embedding trouble never turns into
//! an error on the store or query path.
//!
//! Providers:
//! - **disabled** — never embeds.
//! - **openai** — `POST /v1/embeddings` with exponential-backoff retry.
//! - **ollama** — local Ollama server, same retry policy.
//! - **sim** — deterministic hashed bag-of-words, for tests and offline use.
//!
//! Retry strategy for the HTTP providers:
//! - HTTP 429 and 5xx → retry with backoff 1s, 2s, 4s, ... (capped at 2^5)
//! - other 4xx → fail immediately
//! - network errors → retry

use anyhow::{bail, Result};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::EmbeddingConfig;

/// Dimensionality of the deterministic `sim` provider.
pub const SIM_DIMS: usize = 64;

pub struct EmbeddingService {
    config: EmbeddingConfig,
    /// `true` once the provider probe succeeded, `false` forever after it
    /// failed. Unset while no embed has been attempted.
    ready: OnceCell<bool>,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            ready: OnceCell::new(),
        }
    }

    /// Lifecycle state for status reporting: `disabled`, `loading`,
    /// `ready`, or `fallback`.
    pub fn state(&self) -> &'static str {
        if !self.config.is_enabled() {
            return "disabled";
        }
        match self.ready.get() {
            None => "loading",
            Some(true) => "ready",
            Some(false) => "fallback",
        }
    }

    /// Embed a text, or `None` when no vector can be produced.
    ///
    /// The first call probes the provider; a failed probe flips the
    /// service into fallback for the rest of the process. A transient
    /// failure after a successful probe degrades only that one call.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if !self.config.is_enabled() {
            return None;
        }

        let ready = *self
            .ready
            .get_or_init(|| async {
                match embed_with_provider(&self.config, "spiral embedding probe").await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(provider = %self.config.provider, error = %e,
                            "embedding provider unavailable, running without vectors");
                        false
                    }
                }
            })
            .await;
        if !ready {
            return None;
        }

        match embed_with_provider(&self.config, text).await {
            Ok(vec) => Some(vec),
            Err(e) => {
                tracing::warn!(provider = %self.config.provider, error = %e, "embed call failed");
                None
            }
        }
    }
}

async fn embed_with_provider(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    match config.provider.as_str() {
        "sim" => Ok(sim_embed(text, config.dims.unwrap_or(SIM_DIMS))),
        "openai" => embed_openai(config, text).await,
        "ollama" => embed_ollama(config, text).await,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Deterministic hashed bag-of-words embedding.
///
/// Each lowercase word hashes into one of `dims` buckets; the resulting
/// count vector is L2-normalized. Texts sharing words land near each
/// other, which is all the tests need.
pub fn sim_embed(text: &str, dims: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let dims = dims.max(1);
    let mut vec = vec![0.0f32; dims];
    for word in text.to_lowercase().split_whitespace() {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        vec[(hasher.finish() as usize) % dims] += 1.0;
    }
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

async fn embed_openai(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

    let body = serde_json::json!({
        "model": model,
        "input": [text],
    });

    let json = post_with_retry(
        config,
        "https://api.openai.com/v1/embeddings",
        Some(&api_key),
        &body,
    )
    .await?;

    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

async fn embed_ollama(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

    let body = serde_json::json!({
        "model": model,
        "prompt": text,
    });

    let url = format!("{}/api/embeddings", config.ollama_url.trim_end_matches('/'));
    let json = post_with_retry(config, &url, None, &body).await?;

    let embedding = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// POST a JSON body with exponential-backoff retry on 429/5xx/network
/// errors. Other client errors fail immediately.
async fn post_with_retry(
    config: &EmbeddingConfig,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("Embedding API error {}: {}", status, body_text));
                    continue;
                }
                let body_text = response.text().await.unwrap_or_default();
                bail!("Embedding API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiral_core::embedding::cosine_similarity;

    fn sim_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "sim".to_string(),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_sim_embed_deterministic_and_normalized() {
        let a = sim_embed("the quick brown fox", SIM_DIMS);
        let b = sim_embed("the quick brown fox", SIM_DIMS);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_sim_embed_shared_words_are_closer() {
        let a = sim_embed("database connection pool timeout", SIM_DIMS);
        let b = sim_embed("database connection pool error", SIM_DIMS);
        let c = sim_embed("completely unrelated gardening tips", SIM_DIMS);
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_disabled_provider_returns_none() {
        let service = EmbeddingService::new(EmbeddingConfig::default());
        assert_eq!(service.state(), "disabled");
        assert!(service.embed("anything").await.is_none());
    }

    #[tokio::test]
    async fn test_sim_service_becomes_ready() {
        let service = EmbeddingService::new(sim_config());
        assert_eq!(service.state(), "loading");
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), SIM_DIMS);
        assert_eq!(service.state(), "ready");
    }

    #[tokio::test]
    async fn test_unreachable_provider_falls_back_permanently() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(768),
            // Nothing listens here; reserved port, fails fast.
            ollama_url: "http://127.0.0.1:1".to_string(),
            max_retries: 0,
            timeout_secs: 1,
        };
        let service = EmbeddingService::new(config);
        assert!(service.embed("probe").await.is_none());
        assert_eq!(service.state(), "fallback");
        // Still fallback on subsequent calls.
        assert!(service.embed("again").await.is_none());
        assert_eq!(service.state(), "fallback");
    }
}
