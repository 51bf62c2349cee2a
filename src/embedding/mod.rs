//! 임베딩 모듈 - 텍스트 벡터화 + 프로바이더 선택
//!
//! 선호 프로바이더(Ollama)를 먼저 시도하고, 실패하면 로컬 프로바이더로 대체합니다.
//! 어떤 프로바이더가 선택되었는지 기록해서 UI/인덱서가 경고를 띄울 수 있게 합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let selected = select_from_config(&config).await?;
//! if let Some(warning) = selected.warning() {
//!     println!("{}", warning);
//! }
//! let embedding = selected.provider().embed("Hello, world!").await?;
//! ```

mod local;
mod ollama;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{FallbackKind, RagConfig};
use crate::error::{ProviderInitError, RagError};

pub use local::{FastEmbedding, HashedEmbedding};
pub use ollama::OllamaEmbedding;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 고정 길이 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;

    /// 백엔드 상태 확인 (로컬 프로바이더는 항상 성공)
    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Provider Selection
// ============================================================================

/// 프로바이더 생성기
///
/// 생성 자체가 백엔드 연결/모델 로딩을 포함하므로 실패 원인을 구분해서 돌려줍니다.
#[async_trait]
pub trait EmbeddingFactory: Send + Sync {
    fn label(&self) -> &str;

    async fn build(&self) -> std::result::Result<Arc<dyn EmbeddingProvider>, ProviderInitError>;
}

/// 어느 쪽이 선택되었는지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOrigin {
    Preferred,
    Fallback,
}

/// 선택된 임베딩 프로바이더
#[derive(Clone)]
pub struct SelectedEmbedding {
    provider: Arc<dyn EmbeddingProvider>,
    origin: ProviderOrigin,
    preferred_label: String,
    preferred_error: Option<ProviderInitError>,
}

impl SelectedEmbedding {
    pub fn provider(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.provider)
    }

    pub fn origin(&self) -> ProviderOrigin {
        self.origin
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == ProviderOrigin::Fallback
    }

    /// 선호 프로바이더 실패 원인 (대체 사용 시)
    pub fn preferred_error(&self) -> Option<&ProviderInitError> {
        self.preferred_error.as_ref()
    }

    /// 대체 프로바이더 사용 경고 문구
    pub fn warning(&self) -> Option<String> {
        if !self.is_fallback() {
            return None;
        }
        let reason = self
            .preferred_error
            .as_ref()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default();
        Some(format!(
            "Embeddings use the local fallback `{}` because `{}` is unavailable{}. \
             Retrieval still works, but results may differ from the primary model.",
            self.provider.name(),
            self.preferred_label,
            reason
        ))
    }
}

impl std::fmt::Debug for SelectedEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedEmbedding")
            .field("provider", &self.provider.name())
            .field("dimension", &self.provider.dimension())
            .field("origin", &self.origin)
            .finish()
    }
}

/// 임베딩 프로바이더 선택
///
/// 선호 프로바이더를 한 번 시도하고, 실패하면 대체 프로바이더를 시도합니다.
/// 둘 다 실패하면 시작을 중단해야 하는 설정 에러입니다.
pub async fn select_embedding_provider(
    preferred: &dyn EmbeddingFactory,
    fallback: &dyn EmbeddingFactory,
) -> std::result::Result<SelectedEmbedding, RagError> {
    let preferred_error = match preferred.build().await {
        Ok(provider) => {
            tracing::info!(
                "Using embedding provider {} (dimension: {})",
                provider.name(),
                provider.dimension()
            );
            return Ok(SelectedEmbedding {
                provider,
                origin: ProviderOrigin::Preferred,
                preferred_label: preferred.label().to_string(),
                preferred_error: None,
            });
        }
        Err(e) => e,
    };

    tracing::warn!(
        "Preferred embedding provider {} failed: {}; trying {}",
        preferred.label(),
        preferred_error,
        fallback.label()
    );

    match fallback.build().await {
        Ok(provider) => {
            tracing::warn!(
                "Using fallback embedding provider {} (dimension: {})",
                provider.name(),
                provider.dimension()
            );
            Ok(SelectedEmbedding {
                provider,
                origin: ProviderOrigin::Fallback,
                preferred_label: preferred.label().to_string(),
                preferred_error: Some(preferred_error),
            })
        }
        Err(fallback_error) => Err(RagError::NoEmbeddingProvider {
            preferred: preferred_error,
            fallback: fallback_error,
        }),
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Ollama 임베딩 생성기
pub struct OllamaEmbeddingFactory {
    config: crate::config::OllamaConfig,
}

impl OllamaEmbeddingFactory {
    pub fn new(config: &crate::config::OllamaConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl EmbeddingFactory for OllamaEmbeddingFactory {
    fn label(&self) -> &str {
        &self.config.embed_model
    }

    async fn build(&self) -> std::result::Result<Arc<dyn EmbeddingProvider>, ProviderInitError> {
        let embedder = OllamaEmbedding::connect(&self.config).await?;
        Ok(Arc::new(embedder))
    }
}

/// 로컬 대체 임베딩 생성기
pub struct LocalEmbeddingFactory {
    kind: FallbackKind,
    config: crate::config::EmbeddingConfig,
}

impl LocalEmbeddingFactory {
    pub fn new(config: &crate::config::EmbeddingConfig) -> Self {
        Self {
            kind: config.fallback,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl EmbeddingFactory for LocalEmbeddingFactory {
    fn label(&self) -> &str {
        match self.kind {
            FallbackKind::Hashed => "hashed",
            FallbackKind::Fastembed => "fastembed",
        }
    }

    async fn build(&self) -> std::result::Result<Arc<dyn EmbeddingProvider>, ProviderInitError> {
        match self.kind {
            FallbackKind::Hashed => Ok(Arc::new(HashedEmbedding::new(self.config.hashed_dimension))),
            FallbackKind::Fastembed => {
                let model = self.config.fastembed_model.clone();
                // 모델 로딩은 CPU/디스크 작업
                let embedder = tokio::task::spawn_blocking(move || FastEmbedding::new(&model))
                    .await
                    .map_err(|e| ProviderInitError::Invalid {
                        provider: "fastembed".to_string(),
                        message: format!("model loading task failed: {}", e),
                    })??;
                Ok(Arc::new(embedder))
            }
        }
    }
}

/// 설정에서 선호(Ollama) + 대체(로컬) 프로바이더 선택
pub async fn select_from_config(
    config: &RagConfig,
) -> std::result::Result<SelectedEmbedding, RagError> {
    let preferred = OllamaEmbeddingFactory::new(&config.ollama);
    let fallback = LocalEmbeddingFactory::new(&config.embedding);
    select_embedding_provider(&preferred, &fallback).await
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;

    struct BrokenFactory(ProviderInitError);

    #[async_trait]
    impl EmbeddingFactory for BrokenFactory {
        fn label(&self) -> &str {
            "broken"
        }

        async fn build(
            &self,
        ) -> std::result::Result<Arc<dyn EmbeddingProvider>, ProviderInitError> {
            Err(self.0.clone())
        }
    }

    fn unreachable() -> ProviderInitError {
        ProviderInitError::Unreachable {
            provider: "ollama".to_string(),
            message: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_preferred_wins_when_available() {
        let preferred = LocalEmbeddingFactory::new(&EmbeddingConfig::default());
        let fallback = BrokenFactory(unreachable());

        let selected = select_embedding_provider(&preferred, &fallback).await.unwrap();
        assert_eq!(selected.origin(), ProviderOrigin::Preferred);
        assert!(selected.warning().is_none());
    }

    #[tokio::test]
    async fn test_fallback_records_reason() {
        let preferred = BrokenFactory(unreachable());
        let fallback = LocalEmbeddingFactory::new(&EmbeddingConfig::default());

        let selected = select_embedding_provider(&preferred, &fallback).await.unwrap();
        assert!(selected.is_fallback());
        assert_eq!(selected.provider().name(), "hashed");
        assert!(matches!(
            selected.preferred_error(),
            Some(ProviderInitError::Unreachable { .. })
        ));
        let warning = selected.warning().unwrap();
        assert!(warning.contains("hashed"));
        assert!(warning.contains("broken"));
    }

    #[tokio::test]
    async fn test_both_failing_is_fatal() {
        let preferred = BrokenFactory(unreachable());
        let fallback = BrokenFactory(ProviderInitError::MissingDependency {
            provider: "fastembed".to_string(),
            message: "feature disabled".to_string(),
        });

        let err = select_embedding_provider(&preferred, &fallback)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        match err {
            RagError::NoEmbeddingProvider {
                preferred,
                fallback,
            } => {
                assert!(matches!(preferred, ProviderInitError::Unreachable { .. }));
                assert!(matches!(fallback, ProviderInitError::MissingDependency { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(not(feature = "fastembed"))]
    #[tokio::test]
    async fn test_fastembed_without_feature_is_missing_dependency() {
        let config = EmbeddingConfig {
            fallback: FallbackKind::Fastembed,
            ..Default::default()
        };
        let factory = LocalEmbeddingFactory::new(&config);
        let err = factory.build().await.err().unwrap();
        assert!(matches!(err, ProviderInitError::MissingDependency { .. }));
    }
}
