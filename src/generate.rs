//! Text generation client for answer synthesis.
//!
//! Failures are classified so the query pipeline can phrase degraded
//! answers instead of surfacing transport errors to users.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GenerationConfig;

/// Sampling options forwarded to the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub num_predict: u32,
    pub num_ctx: u32,
    pub top_k: u32,
    pub top_p: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            num_predict: 300,
            num_ctx: 1024,
            top_k: 40,
            top_p: 0.9,
        }
    }
}

impl From<&GenerationConfig> for SamplingParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            num_predict: config.num_predict,
            num_ctx: config.num_ctx,
            top_k: config.top_k,
            top_p: config.top_p,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generation timed out")]
    Timeout,
    #[error("generation service unreachable: {0}")]
    Unreachable(String),
    #[error("generation service error: {0}")]
    Service(String),
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, GenerateError>;
}

/// Generation client for an Ollama server (`POST {host}/api/generate`,
/// non-streaming).
pub struct OllamaGenerator {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building generation HTTP client")?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl GenerationClient for OllamaGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, GenerateError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": params.temperature,
                "num_predict": params.num_predict,
                "num_ctx": params.num_ctx,
                "top_k": params.top_k,
                "top_p": params.top_p,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerateError::Service(format!("{}: {}", status, body_text)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerateError::Service(e.to_string()))?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| GenerateError::Service("response field missing".to_string()))
    }
}

fn classify_transport(e: reqwest::Error) -> GenerateError {
    if e.is_timeout() {
        GenerateError::Timeout
    } else if e.is_connect() {
        GenerateError::Unreachable(e.to_string())
    } else {
        GenerateError::Service(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sampling_params() {
        let params = SamplingParams::default();
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.num_predict, 300);
        assert_eq!(params.num_ctx, 1024);
        assert_eq!(params.top_k, 40);
        assert!((params.top_p - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_params_from_config() {
        let mut config = GenerationConfig::default();
        config.temperature = 0.5;
        config.num_predict = 128;
        let params = SamplingParams::from(&config);
        assert!((params.temperature - 0.5).abs() < f64::EPSILON);
        assert_eq!(params.num_predict, 128);
    }
}
