//! Ollama 임베딩 프로바이더
//!
//! `POST /api/embed` (배치 입력 지원)를 사용합니다.
//! ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OllamaConfig;
use crate::error::ProviderInitError;
use crate::ollama::{OllamaClient, ProbeStatus};

use super::EmbeddingProvider;

/// 전송 실패 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 500;
/// 차원 확인용 텍스트
const DIMENSION_PROBE_TEXT: &str = "dimension probe";

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

/// Ollama 임베딩 구현체
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: OllamaClient,
    model: String,
    dimension: usize,
}

impl OllamaEmbedding {
    /// 백엔드 확인 후 생성
    ///
    /// 상태 확인 → 모델 존재 확인 → 한 번 임베딩해서 출력 차원 확인 순서입니다.
    pub async fn connect(config: &OllamaConfig) -> std::result::Result<Self, ProviderInitError> {
        let provider = "ollama".to_string();
        let client = OllamaClient::new(config).map_err(|e| ProviderInitError::Invalid {
            provider: provider.clone(),
            message: format!("{:#}", e),
        })?;

        match client.probe(&config.embed_model).await {
            ProbeStatus::Ready => {}
            ProbeStatus::ModelMissing { model } => {
                return Err(ProviderInitError::ModelMissing { provider, model })
            }
            ProbeStatus::Unreachable { message } => {
                return Err(ProviderInitError::Unreachable { provider, message })
            }
        }

        let mut embedder = Self {
            client,
            model: config.embed_model.clone(),
            dimension: 0,
        };

        let probe = embedder
            .request(&[DIMENSION_PROBE_TEXT.to_string()])
            .await
            .map_err(|e| ProviderInitError::Invalid {
                provider: provider.clone(),
                message: format!("{:#}", e),
            })?;

        embedder.dimension = probe.first().map(|v| v.len()).unwrap_or(0);
        if embedder.dimension == 0 {
            return Err(ProviderInitError::Invalid {
                provider,
                message: "embedding model returned an empty vector".to_string(),
            });
        }

        Ok(embedder)
    }

    /// API 호출 (전송 실패 시 지수 백오프 재시도)
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            let response = match self
                .client
                .http()
                .post(self.client.endpoint("api/embed"))
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let text = response
                .text()
                .await
                .context("Failed to read embedding response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&text).context("Failed to parse embedding response")?;
                if parsed.embeddings.len() != texts.len() {
                    anyhow::bail!(
                        "Ollama returned {} embeddings for {} inputs",
                        parsed.embeddings.len(),
                        texts.len()
                    );
                }
                return Ok(parsed.embeddings);
            }

            // 4xx/5xx 응답은 재시도하지 않음
            if let Ok(error) = serde_json::from_str::<OllamaError>(&text) {
                anyhow::bail!("Ollama embedding error ({}): {}", status, error.error);
            }
            anyhow::bail!("Ollama embedding error ({}): {}", status, text);
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.request(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty response from Ollama"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        tracing::debug!("Embedding batch of {} texts with {}", texts.len(), self.model);
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }

    async fn probe(&self) -> Result<()> {
        match self.client.probe(&self.model).await {
            ProbeStatus::Ready => Ok(()),
            status => anyhow::bail!(
                "{}",
                status
                    .remediation()
                    .unwrap_or_else(|| "Ollama embedding backend not ready".to_string())
            ),
        }
    }
}
