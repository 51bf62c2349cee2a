//! 로컬 임베딩 프로바이더 (네트워크 불필요)
//!
//! - `HashedEmbedding`: 단어 해싱 기반 TF 벡터. 항상 사용 가능하고 결정적입니다.
//! - `FastEmbedding`: fastembed ONNX 모델 (`fastembed` 기능 필요)

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ProviderInitError;

use super::EmbeddingProvider;

// ============================================================================
// HashedEmbedding
// ============================================================================

/// 해시 기반 로컬 임베딩
///
/// 각 단어를 djb2 해시로 차원에 매핑하고 빈도를 더한 뒤 L2 정규화합니다.
/// 프로세스/플랫폼과 무관하게 같은 입력은 같은 벡터가 됩니다.
#[derive(Debug, Clone)]
pub struct HashedEmbedding {
    dimension: usize,
}

impl HashedEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// 동기 임베딩
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let mut tf: BTreeMap<&str, usize> = BTreeMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        if tf.is_empty() {
            return vector;
        }

        for (term, count) in &tf {
            let idx = djb2(term) % self.dimension;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

fn djb2(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashedEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashed"
    }
}

// ============================================================================
// FastEmbedding
// ============================================================================

/// fastembed 로컬 ONNX 임베딩
#[cfg(feature = "fastembed")]
pub struct FastEmbedding {
    // `TextEmbedding::embed`가 `&mut self`를 요구
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    model_name: String,
    dimension: usize,
}

#[cfg(feature = "fastembed")]
impl FastEmbedding {
    pub fn new(model_name: &str) -> std::result::Result<Self, ProviderInitError> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let model_enum = match model_name {
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            other => {
                return Err(ProviderInitError::Invalid {
                    provider: "fastembed".to_string(),
                    message: format!("unknown fastembed model '{}'", other),
                })
            }
        };

        let mut model = TextEmbedding::try_new(
            InitOptions::new(model_enum).with_show_download_progress(false),
        )
        .map_err(|e| ProviderInitError::Unreachable {
            provider: "fastembed".to_string(),
            message: e.to_string(),
        })?;

        // 테스트 임베딩으로 차원 확인
        let probe = model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| ProviderInitError::Invalid {
                provider: "fastembed".to_string(),
                message: e.to_string(),
            })?;
        let dimension = probe.first().map(|v| v.len()).unwrap_or(0);

        Ok(Self {
            model: std::sync::Mutex::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

#[cfg(feature = "fastembed")]
#[async_trait]
impl EmbeddingProvider for FastEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| anyhow::anyhow!("fastembed returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let inputs: Vec<&str> = texts.iter().map(|t| t.as_str()).collect();
        model
            .embed(inputs, None)
            .map_err(|e| anyhow::anyhow!("fastembed error: {}", e))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// `fastembed` 기능 없이 빌드된 경우의 자리표시자
#[cfg(not(feature = "fastembed"))]
#[derive(Debug)]
pub struct FastEmbedding {
    _private: (),
}

#[cfg(not(feature = "fastembed"))]
impl FastEmbedding {
    pub fn new(model_name: &str) -> std::result::Result<Self, ProviderInitError> {
        Err(ProviderInitError::MissingDependency {
            provider: "fastembed".to_string(),
            message: format!(
                "model '{}' requested but the `fastembed` feature is not enabled",
                model_name
            ),
        })
    }
}

#[cfg(not(feature = "fastembed"))]
#[async_trait]
impl EmbeddingProvider for FastEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("fastembed feature is not enabled")
    }

    fn dimension(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "fastembed"
    }
}

// ============================================================================
// Tests
// ============================================================================
