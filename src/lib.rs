//! lokal-rag - 로컬 RAG 채팅 파이프라인
//!
//! 폴더의 문서를 청킹/임베딩하여 LanceDB 컬렉션에 저장하고,
//! 질문마다 관련 청크를 검색해 Ollama 모델로 답변을 스트리밍합니다.
//! Ollama 임베딩을 쓸 수 없으면 로컬 임베딩으로 대체합니다.

pub mod chat;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod knowledge;
pub mod ollama;

#[cfg(test)]
mod testing;

// Re-exports
pub use chat::{
    CompletionBackend, ConversationMemory, ConversationTurn, OllamaChat, Pipeline, Session,
    SessionState, Synthesizer, TurnObserver, TurnOutcome,
};
pub use config::{get_data_dir, RagConfig};
pub use embedding::{
    select_embedding_provider, select_from_config, EmbeddingProvider, HashedEmbedding,
    OllamaEmbedding, SelectedEmbedding,
};
pub use error::{ErrorKind, RagError, Result};
pub use ingest::{DirectorySource, Document, DocumentSource};
pub use knowledge::{
    EmbeddingSpace, IndexReport, Indexer, LanceVectorIndex, MemoryVectorIndex, Retriever,
    ScoredPassage, VectorIndex,
};
