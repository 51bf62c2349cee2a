//! Ollama HTTP 클라이언트 공통부
//!
//! 임베딩과 답변 생성이 같이 쓰는 상태 확인(liveness probe)입니다.
//! `GET /api/tags`는 가벼운 호출이라 실제 임베딩/생성 전에 백엔드 준비 여부를 알 수 있습니다.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::OllamaConfig;

/// 상태 확인 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// 데몬 동작 중, 모델 사용 가능
    Ready,
    /// 데몬은 동작하지만 모델이 pull 되지 않음
    ModelMissing { model: String },
    /// 데몬에 연결 불가
    Unreachable { message: String },
}

impl ProbeStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// 사용자에게 보여줄 해결 방법
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::Ready => None,
            Self::ModelMissing { model } => Some(format!("Run `ollama pull {model}`.")),
            Self::Unreachable { .. } => Some("Run `ollama serve` to start Ollama.".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Ollama 클라이언트
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
}

impl OllamaClient {
    /// 설정으로 생성
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lokal-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            probe_timeout: config.probe_timeout(),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// API 경로 URL
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// 설치된 모델 목록
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.endpoint("api/tags"))
            .timeout(self.probe_timeout)
            .send()
            .await
            .context("Failed to reach Ollama")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Ollama returned {} for /api/tags", status);
        }

        let tags: TagsResponse = response
            .json()
            .await
            .context("Failed to parse /api/tags response")?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// 데몬 + 모델 상태 확인
    pub async fn probe(&self, model: &str) -> ProbeStatus {
        match self.list_models().await {
            Ok(models) => {
                if has_model(&models, model) {
                    ProbeStatus::Ready
                } else {
                    ProbeStatus::ModelMissing {
                        model: model.to_string(),
                    }
                }
            }
            Err(e) => ProbeStatus::Unreachable {
                message: format!("{:#}", e),
            },
        }
    }
}

/// 모델 이름 비교 (`nomic-embed-text` == `nomic-embed-text:latest`)
pub fn has_model(models: &[String], wanted: &str) -> bool {
    let normalize = |name: &str| {
        if name.contains(':') {
            name.to_string()
        } else {
            format!("{}:latest", name)
        }
    };
    let wanted = normalize(wanted);
    models.iter().any(|m| normalize(m) == wanted)
}
