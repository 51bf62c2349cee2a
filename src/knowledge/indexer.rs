//! Corpus Indexer - 문서 → 청크 → 임베딩 → 벡터 인덱스
//!
//! 청크 ID는 `sha256(source_id + chunk_index)`라서 같은 소스를 다시 인덱싱해도
//! 같은 ID로 덮어쓰기만 합니다. 매니페스트가 있으면 내용 해시가 같은 청크는
//! 임베딩을 건너뛰고, 소스에서 사라진 청크는 인덱스에서 지웁니다.
//! 컬렉션과 다른 임베딩 공간의 프로바이더로는 인덱싱하지 않습니다.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::ingest::{Document, DocumentSource};

use super::chunker::{default_chunker, Chunker};
use super::manifest::{IndexManifest, ManifestEntry};
use super::vector::{ensure_compatible, VectorEntry, VectorIndex};

/// 기본 임베딩 배치 크기
pub const DEFAULT_BATCH_SIZE: usize = 16;

// ============================================================================
// Types
// ============================================================================

/// 인덱싱 결과 요약
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    /// 로드된 문서 수
    pub documents: usize,
    /// 읽지 못해 건너뛴 파일 수
    pub documents_skipped: usize,
    /// 생성된 청크 수
    pub chunks: usize,
    /// 새로 임베딩한 청크 수
    pub embedded: usize,
    /// 내용이 같아 건너뛴 청크 수
    pub unchanged: usize,
    /// 삭제된 오래된 청크 수
    pub pruned: usize,
    pub load_elapsed: Duration,
    pub embed_store_elapsed: Duration,
}

/// 임베딩 전 청크
#[derive(Debug, Clone)]
struct PendingChunk {
    entry: VectorEntry,
}

// ============================================================================
// Indexer
// ============================================================================

/// 코퍼스 인덱서
pub struct Indexer {
    chunker: Box<dyn Chunker>,
    batch_size: usize,
    manifest: Option<IndexManifest>,
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new(default_chunker())
    }
}

impl Indexer {
    pub fn new(chunker: Box<dyn Chunker>) -> Self {
        Self {
            chunker,
            batch_size: DEFAULT_BATCH_SIZE,
            manifest: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// 매니페스트 사용 (변경 감지 + 오래된 청크 정리)
    pub fn with_manifest(mut self, manifest: IndexManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// 인덱스 빌드
    ///
    /// 문서 하나를 읽지 못하면 경고만 남기고, 임베딩/인덱스 실패는 에러로 중단합니다.
    pub async fn build(
        &self,
        source: &dyn DocumentSource,
        provider: &dyn EmbeddingProvider,
        index: &dyn VectorIndex,
    ) -> Result<IndexReport> {
        ensure_compatible(provider, index)?;

        let mut report = IndexReport::default();

        // 1. 문서 로드
        let load_start = Instant::now();
        let loaded = source.load().await?;
        report.load_elapsed = load_start.elapsed();
        report.documents = loaded.documents.len();
        report.documents_skipped = loaded.warnings.len();

        tracing::info!(
            "Loaded {} documents from {} in {:.2}s",
            report.documents,
            source.describe(),
            report.load_elapsed.as_secs_f64()
        );

        // 2. 청킹
        let chunks: Vec<PendingChunk> = loaded
            .documents
            .iter()
            .flat_map(|doc| chunk_document(doc, self.chunker.as_ref()))
            .collect();
        report.chunks = chunks.len();

        tracing::info!(
            "Split into {} chunks with {} chunker",
            report.chunks,
            self.chunker.name()
        );

        // 3. 임베딩 + 저장
        let embed_start = Instant::now();
        let collection = index.collection().to_string();
        let space_key = index.space().key();

        let pending = match &self.manifest {
            Some(manifest) => {
                report.pruned = self
                    .prune_stale(manifest, &loaded.documents, &chunks, index)
                    .await?;
                self.filter_unchanged(manifest, chunks, index, &space_key)
                    .await?
            }
            None => chunks,
        };
        report.unchanged = report.chunks - pending.len();

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.entry.text.clone()).collect();

            let embeddings = provider.embed_batch(&texts).await.map_err(|e| {
                RagError::BackendUnavailable {
                    backend: format!("embedding ({})", provider.name()),
                    message: format!("{:#}", e),
                    hint: "Start the Ollama daemon with `ollama serve` and run the index command again."
                        .to_string(),
                }
            })?;

            if embeddings.len() != batch.len() {
                return Err(RagError::Storage(anyhow::anyhow!(
                    "Embedding provider returned {} vectors for {} chunks",
                    embeddings.len(),
                    batch.len()
                )));
            }

            let mut entries = Vec::with_capacity(batch.len());
            for (chunk, embedding) in batch.iter().zip(embeddings) {
                if embedding.len() != index.dimension() {
                    return Err(RagError::configuration(
                        format!(
                            "Chunk {} embedded to {} dimensions, collection '{}' expects {}",
                            chunk.entry.id,
                            embedding.len(),
                            collection,
                            index.dimension()
                        ),
                        "Use the embedding model the collection was built with.",
                    ));
                }
                let mut entry = chunk.entry.clone();
                entry.embedding = embedding;
                entries.push(entry);
            }

            index.upsert(&entries).await?;

            if let Some(manifest) = &self.manifest {
                let records: Vec<ManifestEntry> = entries.iter().map(manifest_entry).collect();
                manifest.record(&collection, &space_key, &records)?;
            }

            report.embedded += entries.len();
            tracing::debug!(
                "Stored batch of {} chunks ({}/{})",
                entries.len(),
                report.embedded,
                pending.len()
            );
        }

        report.embed_store_elapsed = embed_start.elapsed();

        tracing::info!(
            "Indexed {} chunks into '{}' ({} embedded, {} unchanged, {} pruned) in {:.2}s",
            report.chunks,
            collection,
            report.embedded,
            report.unchanged,
            report.pruned,
            report.embed_store_elapsed.as_secs_f64()
        );

        Ok(report)
    }

    /// 같은 임베딩 공간에서 내용 해시가 같은 청크 제외
    ///
    /// 매니페스트가 인덱스보다 많은 청크를 기록하고 있으면 매니페스트를 믿지 않고 초기화합니다.
    async fn filter_unchanged(
        &self,
        manifest: &IndexManifest,
        chunks: Vec<PendingChunk>,
        index: &dyn VectorIndex,
        space_key: &str,
    ) -> Result<Vec<PendingChunk>> {
        let collection = index.collection();
        let mut known = manifest.chunk_hashes(collection, space_key)?;

        let stored = index.count().await?;
        if known.len() > stored {
            tracing::warn!(
                "Manifest lists {} chunks but collection '{}' holds {}; re-embedding everything",
                known.len(),
                collection,
                stored
            );
            manifest.reset(collection)?;
            known.clear();
        }

        Ok(chunks
            .into_iter()
            .filter(|c| known.get(&c.entry.id) != Some(&c.entry.content_hash))
            .collect())
    }

    /// 다시 인덱싱한 소스에서 사라진 청크 삭제
    async fn prune_stale(
        &self,
        manifest: &IndexManifest,
        documents: &[Document],
        chunks: &[PendingChunk],
        index: &dyn VectorIndex,
    ) -> Result<usize> {
        let collection = index.collection();
        let current: HashSet<&str> = chunks.iter().map(|c| c.entry.id.as_str()).collect();

        let mut stale = Vec::new();
        for doc in documents {
            for id in manifest.chunk_ids_for_source(collection, &doc.id)? {
                if !current.contains(id.as_str()) {
                    stale.push(id);
                }
            }
        }

        if stale.is_empty() {
            return Ok(0);
        }

        let removed = index.delete(&stale).await?;
        manifest.remove(collection, &stale)?;
        tracing::info!("Pruned {} stale chunks from '{}'", removed, collection);
        Ok(removed)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 청크 ID (소스 + 청크 인덱스의 SHA-256)
pub fn chunk_id(source_id: &str, chunk_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(chunk_index.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// 텍스트 내용 해시
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// 문서 하나를 청크로 분할 (임베딩은 비어 있음)
fn chunk_document(doc: &Document, chunker: &dyn Chunker) -> Vec<PendingChunk> {
    chunker
        .chunk(&doc.text)
        .into_iter()
        .enumerate()
        .map(|(i, span)| {
            let chunk_index = i as u32;
            let mut metadata = doc.metadata.clone();
            metadata.insert("chunk_index".to_string(), chunk_index.to_string());
            metadata.insert("start_offset".to_string(), span.start.to_string());
            metadata.insert("end_offset".to_string(), span.end.to_string());

            PendingChunk {
                entry: VectorEntry {
                    id: chunk_id(&doc.id, chunk_index),
                    source_id: doc.id.clone(),
                    chunk_index,
                    content_hash: content_hash(&span.text),
                    text: span.text,
                    metadata,
                    embedding: Vec::new(),
                },
            }
        })
        .collect()
}

fn manifest_entry(entry: &VectorEntry) -> ManifestEntry {
    ManifestEntry {
        chunk_id: entry.id.clone(),
        source_id: entry.source_id.clone(),
        chunk_index: entry.chunk_index,
        content_hash: entry.content_hash.clone(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedding;
    use crate::knowledge::{ChunkConfig, EmbeddingSpace, MemoryVectorIndex, WindowChunker};
    use crate::testing::{
        document, CountingEmbedding, FailingEmbedding, NamedEmbedding, StaticSource,
    };
    use tempfile::TempDir;

    const DIM: usize = 64;

    fn small_chunker() -> Box<dyn Chunker> {
        Box::new(WindowChunker::new(ChunkConfig {
            min_characters: 10,
            max_characters: 60,
            overlap_characters: 10,
        }))
    }

    fn corpus() -> StaticSource {
        StaticSource::new(vec![
            document("a.md", "Volcanoes erupt when magma pressure builds beneath the crust of the earth."),
            document("b.md", "Sourdough bread rises slowly because of wild yeast and lactic bacteria."),
        ])
    }

    #[test]
    fn test_chunk_id_stable_and_distinct() {
        assert_eq!(chunk_id("a.md", 0), chunk_id("a.md", 0));
        assert_ne!(chunk_id("a.md", 0), chunk_id("a.md", 1));
        assert_ne!(chunk_id("a.md", 1), chunk_id("b.md", 1));
        assert_eq!(chunk_id("a.md", 0).len(), 64);
    }

    #[test]
    fn test_chunk_metadata() {
        let doc = document("a.md", "Short text that fits in one chunk.");
        let chunks = chunk_document(&doc, small_chunker().as_ref());
        assert_eq!(chunks.len(), 1);

        let meta = &chunks[0].entry.metadata;
        assert_eq!(meta["file_name"], "a.md");
        assert_eq!(meta["chunk_index"], "0");
        assert_eq!(meta["start_offset"], "0");
        assert_eq!(meta["end_offset"], doc.text.len().to_string());
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent_without_manifest() {
        let provider = HashedEmbedding::new(DIM);
        let index = MemoryVectorIndex::for_provider("docs", &provider);
        let indexer = Indexer::new(small_chunker());

        let first = indexer.build(&corpus(), &provider, &index).await.unwrap();
        let ids_first = index.list_ids().await.unwrap();
        let second = indexer.build(&corpus(), &provider, &index).await.unwrap();
        let ids_second = index.list_ids().await.unwrap();

        assert!(first.chunks >= 2);
        assert_eq!(first.chunks, second.chunks);
        assert_eq!(index.count().await.unwrap(), first.chunks);
        assert_eq!(ids_first, ids_second);

        let unique: HashSet<_> = ids_second.iter().collect();
        assert_eq!(unique.len(), ids_second.len());
    }

    #[tokio::test]
    async fn test_manifest_skips_unchanged_and_prunes() {
        let dir = TempDir::new().unwrap();
        let manifest = IndexManifest::open(&dir.path().join("manifest.db")).unwrap();
        let provider = CountingEmbedding::new(HashedEmbedding::new(DIM));
        let index = MemoryVectorIndex::for_provider("docs", &provider);
        let indexer = Indexer::new(small_chunker()).with_manifest(manifest);

        let first = indexer.build(&corpus(), &provider, &index).await.unwrap();
        assert_eq!(first.embedded, first.chunks);
        let calls_after_first = provider.texts_embedded();

        let second = indexer.build(&corpus(), &provider, &index).await.unwrap();
        assert_eq!(second.embedded, 0);
        assert_eq!(second.unchanged, second.chunks);
        assert_eq!(provider.texts_embedded(), calls_after_first);

        // a.md가 짧아지면 남는 청크는 정리됨
        let shrunk = StaticSource::new(vec![
            document("a.md", "Volcanoes erupt."),
            document("b.md", "Sourdough bread rises slowly because of wild yeast and lactic bacteria."),
        ]);
        let third = indexer.build(&shrunk, &provider, &index).await.unwrap();
        assert!(third.pruned >= 1);
        assert_eq!(index.count().await.unwrap(), third.chunks);
    }

    #[tokio::test]
    async fn test_manifest_reset_when_index_lost() {
        let dir = TempDir::new().unwrap();
        let manifest = IndexManifest::open(&dir.path().join("manifest.db")).unwrap();
        let provider = HashedEmbedding::new(DIM);
        let indexer = Indexer::new(small_chunker()).with_manifest(manifest);

        let first_index = MemoryVectorIndex::for_provider("docs", &provider);
        indexer.build(&corpus(), &provider, &first_index).await.unwrap();

        // 같은 이름의 빈 컬렉션 (인덱스 파일이 지워진 상황)
        let fresh_index = MemoryVectorIndex::for_provider("docs", &provider);
        let report = indexer.build(&corpus(), &provider, &fresh_index).await.unwrap();
        assert_eq!(report.embedded, report.chunks);
        assert_eq!(fresh_index.count().await.unwrap(), report.chunks);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_configuration_error() {
        let index = MemoryVectorIndex::new("docs", EmbeddingSpace::new("hashed", DIM));
        let provider = HashedEmbedding::new(DIM / 2);
        let err = Indexer::default()
            .build(&corpus(), &provider, &index)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_same_dimension_other_provider_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manifest = IndexManifest::open(&dir.path().join("manifest.db")).unwrap();
        let hashed = HashedEmbedding::new(DIM);
        let index = MemoryVectorIndex::for_provider("docs", &hashed);
        let indexer = Indexer::new(small_chunker()).with_manifest(manifest);
        let first = indexer.build(&corpus(), &hashed, &index).await.unwrap();

        // 한 문서가 바뀐 뒤 같은 차원의 다른 모델로 재인덱싱
        let changed = StaticSource::new(vec![
            document("a.md", "Volcanoes erupt when magma pressure builds beneath the crust of the earth."),
            document("b.md", "Rye bread rises quickly with commercial yeast and a warm kitchen."),
        ]);
        let other = CountingEmbedding::new(NamedEmbedding::new("nomic-embed-text", DIM));
        let err = indexer.build(&changed, &other, &index).await.unwrap_err();

        assert!(err.is_fatal());
        assert!(err.user_message().contains("hashed"));
        assert_eq!(other.texts_embedded(), 0);
        assert_eq!(index.count().await.unwrap(), first.chunks);
    }

    #[tokio::test]
    async fn test_provider_switch_reembeds_everything() {
        let dir = TempDir::new().unwrap();
        let manifest = IndexManifest::open(&dir.path().join("manifest.db")).unwrap();
        let hashed = HashedEmbedding::new(DIM);
        let other = CountingEmbedding::new(NamedEmbedding::new("nomic-embed-text", DIM));

        // 같은 이름의 컬렉션이 다른 모델로 이미 채워져 있음
        let other_index = MemoryVectorIndex::for_provider("docs", &other);
        Indexer::new(small_chunker())
            .build(&corpus(), &other, &other_index)
            .await
            .unwrap();
        let calls_before = other.texts_embedded();

        let indexer = Indexer::new(small_chunker()).with_manifest(manifest);
        let hashed_index = MemoryVectorIndex::for_provider("docs", &hashed);
        indexer.build(&corpus(), &hashed, &hashed_index).await.unwrap();

        // 매니페스트의 해시는 다른 임베딩 공간의 것이므로 건너뛰지 않음
        let report = indexer.build(&corpus(), &other, &other_index).await.unwrap();
        assert_eq!(report.embedded, report.chunks);
        assert_eq!(report.unchanged, 0);
        assert_eq!(other.texts_embedded(), calls_before + report.chunks);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal_backend_error() {
        let provider = FailingEmbedding::new(DIM);
        let index = MemoryVectorIndex::for_provider("docs", &provider);
        let err = Indexer::default()
            .build(&corpus(), &provider, &index)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::BackendUnavailable { .. }));
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_warnings_are_counted() {
        let provider = HashedEmbedding::new(DIM);
        let index = MemoryVectorIndex::for_provider("docs", &provider);
        let source = corpus().with_warning("broken.pdf");

        let report = Indexer::default().build(&source, &provider, &index).await.unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.documents_skipped, 1);
    }
}
