#[cfg(test)]
mod tests;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::EmbeddingConfig;
use crate::{LecternError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Client for the embedding service (Ollama-compatible `/api/embed`).
///
/// Failures and timeouts surface as [`LecternError::Upstream`]; the caller
/// decides whether to retry the enclosing operation.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    base_url: Url,
    model: String,
    batch_size: usize,
    http: reqwest::Client,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .base_url()
            .map_err(|e| LecternError::Config(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(LecternError::upstream)?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size as usize,
            http,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Embed every text, preserving input order.
    ///
    /// Texts are sent upstream in batches of `batch_size`. A failed batch
    /// fails the whole call; earlier batches are not rolled back.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let embeddings = self.embed_single_batch(batch).await?;
            results.extend(embeddings);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    async fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/api/embed")
            .map_err(|e| LecternError::Config(format!("Failed to build embedding URL: {}", e)))?;

        let request = EmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response: EmbedResponse = self.post_with_retry(&url, &request).await?;

        if response.embeddings.len() != texts.len() {
            return Err(LecternError::Upstream(format!(
                "Embedding count mismatch: requested {}, received {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }

    async fn post_with_retry<T, R>(&self, url: &Url, body: &T) -> Result<R>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            match self.http.post(url.clone()).json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<R>()
                            .await
                            .map_err(|e| LecternError::Upstream(format!(
                                "Failed to parse embedding response: {}",
                                e
                            )));
                    }

                    if status.is_server_error() {
                        warn!(
                            "Embedding server error (status {}), attempt {}/{}",
                            status, attempt, self.retry_attempts
                        );
                        last_error = Some(LecternError::Upstream(format!(
                            "Embedding service returned HTTP {}",
                            status
                        )));
                    } else {
                        // 4xx means the request itself is wrong; retrying
                        // cannot help.
                        let detail = response.text().await.unwrap_or_default();
                        return Err(LecternError::Upstream(format!(
                            "Embedding service rejected request: HTTP {} {}",
                            status, detail
                        )));
                    }
                }
                Err(error) => {
                    warn!(
                        "Embedding transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(LecternError::upstream(error));
                }
            }

            if attempt < self.retry_attempts {
                let delay = Duration::from_millis(EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000);
                debug!("Waiting {:?} before retry", delay);
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| LecternError::Upstream("Embedding request failed".to_string())))
    }
}
