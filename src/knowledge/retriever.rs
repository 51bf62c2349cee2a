//! Retriever - 질의 임베딩 + 벡터 검색
//!
//! 실패는 `RagError::RetrievalFailed`로만 돌려주고, 컨텍스트 없이 답할지는 호출자가 정합니다.

use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::vector::{ensure_compatible, Metadata, VectorIndex};

// ============================================================================
// ScoredPassage
// ============================================================================

/// 검색된 청크
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPassage {
    pub chunk_id: String,
    pub text: String,
    pub metadata: Metadata,
    /// 코사인 유사도 (높을수록 관련)
    pub score: f32,
}

impl ScoredPassage {
    /// 파일 이름 (없으면 "unknown")
    pub fn file_name(&self) -> &str {
        self.metadata
            .get("file_name")
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// 표시용 미리보기 (공백 정리, 최대 `max_chars`자)
    pub fn preview(&self, max_chars: usize) -> String {
        let flat = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() <= max_chars {
            return flat;
        }
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

// ============================================================================
// Retriever
// ============================================================================

/// 검색기
///
/// 서빙 중에는 읽기만 하므로 `Arc`로 여러 세션이 공유합니다.
#[derive(Clone)]
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    /// 생성
    ///
    /// 컬렉션을 만든 프로바이더/차원과 현재 프로바이더가 다르면 설정 에러입니다.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Result<Self> {
        ensure_compatible(provider.as_ref(), index.as_ref())?;
        Ok(Self { provider, index })
    }

    pub fn collection(&self) -> &str {
        self.index.collection()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 임베딩 백엔드 상태 확인
    pub async fn probe_embedding(&self) -> Result<()> {
        self.provider
            .probe()
            .await
            .map_err(|e| RagError::RetrievalFailed {
                message: format!("embedding backend `{}` is not ready: {:#}", self.provider.name(), e),
                hint: "Questions will be answered without document context until it is back."
                    .to_string(),
            })
    }

    /// 질의와 가장 관련 있는 청크 최대 `top_k`개 (점수 내림차순)
    ///
    /// 빈 질의는 백엔드를 호출하지 않고 빈 결과입니다.
    pub async fn retrieve(&self, query: &str, top_k: NonZeroUsize) -> Result<Vec<ScoredPassage>> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }

        let embedding = self
            .provider
            .embed(query)
            .await
            .map_err(|e| RagError::RetrievalFailed {
                message: format!("embedding the question failed: {:#}", e),
                hint: format!(
                    "Check that the embedding backend `{}` is running (for Ollama: `ollama serve`).",
                    self.provider.name()
                ),
            })?;

        let hits = self
            .index
            .query(&embedding, top_k.get())
            .await
            .map_err(|e| RagError::RetrievalFailed {
                message: format!("vector search failed: {:#}", e),
                hint: "Rebuild the collection with `lokal-rag index`.".to_string(),
            })?;

        let mut passages: Vec<ScoredPassage> = hits
            .into_iter()
            .map(|hit| ScoredPassage {
                chunk_id: hit.id,
                text: hit.text,
                metadata: hit.metadata,
                score: hit.score,
            })
            .collect();

        // 어댑터 순서를 유지하는 stable sort
        passages.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        passages.truncate(top_k.get());

        tracing::debug!(
            "Retrieved {} passages from '{}'",
            passages.len(),
            self.index.collection()
        );

        Ok(passages)
    }
}

// ============================================================================
// Tests
// ============================================================================
