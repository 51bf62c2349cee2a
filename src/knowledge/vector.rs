//! Vector Index - 벡터 검색 트레이트 및 유틸리티
//!
//! 하나의 `VectorIndex` 값은 열린 컬렉션 하나이며, 임베딩 공간(프로바이더 + 차원)이 고정되어 있습니다.
//! 점수는 모든 구현에서 코사인 유사도(-1.0 ~ 1.0, 높을수록 관련)입니다.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;

/// 청크 메타데이터 (키 순서가 고정된 맵)
pub type Metadata = BTreeMap<String, String>;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// 청크 ID (소스 + 청크 인덱스의 해시)
    pub id: String,
    /// 원본 문서 ID
    pub source_id: String,
    /// 청크 인덱스 (0-based)
    pub chunk_index: u32,
    /// 청크 텍스트
    pub text: String,
    /// 텍스트 해시 (재인덱싱 시 변경 감지)
    pub content_hash: String,
    pub metadata: Metadata,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// 코사인 유사도
    pub score: f32,
}

/// 컬렉션을 만든 임베딩 공간
///
/// 차원이 같아도 프로바이더(모델)가 다르면 벡터끼리 비교할 수 없습니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingSpace {
    pub provider: String,
    pub dimension: usize,
}

impl EmbeddingSpace {
    pub fn new(provider: impl AsRef<str>, dimension: usize) -> Self {
        // Ollama는 `model`과 `model:latest`를 같은 모델로 취급
        let provider = provider.as_ref().trim();
        let provider = provider.strip_suffix(":latest").unwrap_or(provider);
        Self {
            provider: provider.to_string(),
            dimension,
        }
    }

    /// 프로바이더가 만드는 임베딩 공간
    pub fn of(provider: &dyn EmbeddingProvider) -> Self {
        Self::new(provider.name(), provider.dimension())
    }

    /// 저장용 키 (`<provider>/<dimension>`)
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider, self.dimension)
    }
}

impl fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({} dimensions)", self.provider, self.dimension)
    }
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// 벡터 인덱스 트레이트 (async)
///
/// 서빙 중에는 읽기만 하므로 여러 세션이 동시에 `query`해도 안전해야 합니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 컬렉션 이름
    fn collection(&self) -> &str;

    /// 컬렉션을 만든 임베딩 공간
    fn space(&self) -> &EmbeddingSpace;

    /// 임베딩 차원
    fn dimension(&self) -> usize {
        self.space().dimension
    }

    /// ID 기준 삽입/덮어쓰기
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// ID로 삭제
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// 최근접 검색 (점수 내림차순)
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    /// 엔트리 개수
    async fn count(&self) -> Result<usize>;

    /// 저장된 ID 목록
    async fn list_ids(&self) -> Result<Vec<String>>;
}

// ============================================================================
// MemoryVectorIndex
// ============================================================================

#[derive(Debug, Default)]
struct MemoryCollection {
    entries: Vec<VectorEntry>,
    positions: HashMap<String, usize>,
}

/// 메모리 벡터 인덱스 (전수 코사인 검색)
///
/// 동점은 삽입 순서를 유지합니다. 덮어쓰기는 원래 위치를 유지합니다.
#[derive(Debug)]
pub struct MemoryVectorIndex {
    name: String,
    space: EmbeddingSpace,
    inner: RwLock<MemoryCollection>,
}

impl MemoryVectorIndex {
    pub fn new(name: impl Into<String>, space: EmbeddingSpace) -> Self {
        Self {
            name: name.into(),
            space,
            inner: RwLock::new(MemoryCollection::default()),
        }
    }

    /// 프로바이더의 임베딩 공간으로 빈 컬렉션 생성
    pub fn for_provider(name: impl Into<String>, provider: &dyn EmbeddingProvider) -> Self {
        Self::new(name, EmbeddingSpace::of(provider))
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn collection(&self) -> &str {
        &self.name
    }

    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        check_dimensions(entries, self.space.dimension)?;

        let mut inner = self.inner.write().await;
        for entry in entries {
            match inner.positions.get(&entry.id).copied() {
                Some(pos) => inner.entries[pos] = entry.clone(),
                None => {
                    let pos = inner.entries.len();
                    inner.positions.insert(entry.id.clone(), pos);
                    inner.entries.push(entry.clone());
                }
            }
        }
        Ok(entries.len())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|e| !ids.contains(&e.id));
        let removed = before - inner.entries.len();

        // 위치 재계산
        let positions = inner
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        inner.positions = positions;

        Ok(removed)
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        if embedding.len() != self.space.dimension {
            anyhow::bail!(
                "Query embedding has dimension {}, collection '{}' expects {}",
                embedding.len(),
                self.name,
                self.space.dimension
            );
        }

        let inner = self.inner.read().await;
        let mut hits: Vec<VectorHit> = inner
            .entries
            .iter()
            .map(|e| VectorHit {
                id: e.id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
                score: cosine_similarity(&e.embedding, embedding),
            })
            .collect();

        // stable sort: 동점은 삽입 순서
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.entries.len())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read()
            .await
            .entries
            .iter()
            .map(|e| e.id.clone())
            .collect())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 프로바이더가 컬렉션의 임베딩 공간과 같은지 확인
///
/// 다르면 검색 점수가 의미 없으므로 설정 에러입니다.
pub fn ensure_compatible(
    provider: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
) -> crate::error::Result<()> {
    let active = EmbeddingSpace::of(provider);
    if &active == index.space() {
        return Ok(());
    }
    Err(space_mismatch(index.collection(), index.space(), &active))
}

pub(crate) fn space_mismatch(
    collection: &str,
    stored: &EmbeddingSpace,
    active: &EmbeddingSpace,
) -> RagError {
    RagError::configuration(
        format!(
            "Collection '{}' was built with embeddings from {} but the active embedding provider is {}",
            collection, stored, active
        ),
        format!(
            "Start `ollama serve` so '{}' is available again, or re-index into a new collection with `lokal-rag index --dir <documents> --collection <new name>`.",
            stored.provider
        ),
    )
}

/// 엔트리 차원 검증
pub(crate) fn check_dimensions(entries: &[VectorEntry], dimension: usize) -> Result<()> {
    if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimension) {
        anyhow::bail!(
            "Embedding dimension mismatch for chunk {}: got {}, collection expects {}",
            bad.id,
            bad.embedding.len(),
            dimension
        );
    }
    Ok(())
}

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
