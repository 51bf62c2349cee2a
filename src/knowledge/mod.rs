//! Knowledge 모듈 - 청킹, 벡터 인덱스, 인덱싱, 검색
//!
//! - Chunker: 문서를 검색 단위로 분할
//! - VectorIndex: LanceDB(영속) / 메모리 구현
//! - Manifest: SQLite에 인덱싱 기록 (변경 감지)
//! - Indexer / Retriever: 인덱스 쓰기와 읽기

mod chunker;
mod indexer;
mod lance;
mod manifest;
mod retriever;
mod vector;

// Re-exports
pub use chunker::{
    chunker_from_config, default_chunker, ChunkConfig, Chunker, MarkdownChunker, TextSpan,
    WindowChunker,
};
pub use indexer::{chunk_id, content_hash, IndexReport, Indexer, DEFAULT_BATCH_SIZE};
pub use lance::LanceVectorIndex;
pub use manifest::{IndexManifest, ManifestEntry, ManifestStats};
pub use retriever::{Retriever, ScoredPassage};
pub use vector::{
    cosine_similarity, ensure_compatible, EmbeddingSpace, Metadata, MemoryVectorIndex,
    VectorEntry, VectorHit, VectorIndex,
};
