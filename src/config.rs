//! 설정 모듈
//!
//! 한 번 만들어서 각 컴포넌트 생성자에 참조로 넘기는 설정 객체입니다.
//! 우선순위: 기본값 < JSON 설정 파일 < 환경변수 < CLI 플래그

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::knowledge::ChunkConfig;

/// 기본 Ollama 주소
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// 기본 컬렉션 이름
pub const DEFAULT_COLLECTION: &str = "rag_lokal_collection";

/// 기본 시스템 프롬프트
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
about the user's local documents. Use the context below when it is relevant. If the context \
does not contain the answer, say so instead of guessing.";

/// 데이터 디렉토리 경로 (~/.lokal-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lokal-rag")
}

// ============================================================================
// Sections
// ============================================================================

/// Ollama 백엔드 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    /// 답변 생성 모델
    pub llm_model: String,
    /// 임베딩 모델
    pub embed_model: String,
    /// 생성 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 상태 확인 타임아웃 (초)
    pub probe_timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            llm_model: "qwen3:8b".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            request_timeout_secs: 300,
            probe_timeout_secs: 2,
        }
    }
}

impl OllamaConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// 대체 임베딩 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FallbackKind {
    /// 해시 기반 로컬 임베딩 (항상 사용 가능)
    Hashed,
    /// fastembed ONNX 모델 (`fastembed` 기능 필요)
    Fastembed,
}

/// 임베딩 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub fallback: FallbackKind,
    /// fastembed 모델 이름
    pub fastembed_model: String,
    /// 해시 임베딩 차원
    pub hashed_dimension: usize,
    /// 인덱싱 배치 크기
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            fallback: FallbackKind::Hashed,
            fastembed_model: "bge-base-en-v1.5".to_string(),
            hashed_dimension: 768,
            batch_size: 16,
        }
    }
}

/// 벡터 인덱스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub path: PathBuf,
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: get_data_dir().join("index"),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl IndexConfig {
    /// 매니페스트 DB 경로 (인덱스 디렉토리 안)
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join("manifest.db")
    }
}

/// 청킹 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Window,
    Markdown,
}

/// 청킹 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let base = ChunkConfig::default();
        Self {
            strategy: ChunkStrategy::Window,
            chunk_size: base.max_characters,
            chunk_overlap: base.overlap_characters,
        }
    }
}

impl ChunkingConfig {
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_characters: self.chunk_size,
            overlap_characters: self.chunk_overlap,
            ..ChunkConfig::default()
        }
    }
}

/// 검색 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: NonZeroUsize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: NonZeroUsize::new(5).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// 대화 메모리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub token_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { token_limit: 3000 }
    }
}

/// 답변 합성 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub system_prompt: String,
    /// 근거 컨텍스트 최대 문자 수
    pub max_context_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_context_chars: 6000,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub ollama: OllamaConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub memory: MemoryConfig,
    pub synthesis: SynthesisConfig,
}

impl RagConfig {
    /// 설정 파일(선택) + 환경변수로 설정 로드
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// JSON 설정 파일 읽기
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// 환경변수 덮어쓰기
    ///
    /// `lookup`을 주입받아 테스트에서 프로세스 환경을 건드리지 않습니다.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("OLLAMA_HOST") {
            self.ollama.base_url = normalize_base_url(&host);
        }
        if let Some(model) = get("LOKAL_RAG_LLM_MODEL") {
            self.ollama.llm_model = model;
        }
        if let Some(model) = get("LOKAL_RAG_EMBED_MODEL") {
            self.ollama.embed_model = model;
        }
        if let Some(path) = get("LOKAL_RAG_INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        if let Some(collection) = get("LOKAL_RAG_COLLECTION") {
            self.index.collection = collection;
        }
    }

    /// 값 검증
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.ollama.base_url)
            .with_context(|| format!("Invalid Ollama URL: {}", self.ollama.base_url))?;

        if self.index.collection.trim().is_empty() {
            anyhow::bail!("Collection name must not be empty");
        }
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.embedding.hashed_dimension == 0 || self.embedding.batch_size == 0 {
            anyhow::bail!("Embedding dimension and batch size must be greater than 0");
        }
        Ok(())
    }
}

/// `OLLAMA_HOST`는 스킴 없이 `host:port`로 주어지기도 합니다.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.ollama.base_url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.index.collection, DEFAULT_COLLECTION);
        assert_eq!(config.retrieval.top_k.get(), 5);
        assert_eq!(config.memory.token_limit, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OLLAMA_HOST", "127.0.0.1:11500"),
            ("LOKAL_RAG_LLM_MODEL", "llama3.2"),
            ("LOKAL_RAG_COLLECTION", " "),
        ]
        .into_iter()
        .collect();

        let mut config = RagConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.ollama.base_url, "http://127.0.0.1:11500");
        assert_eq!(config.ollama.llm_model, "llama3.2");
        // 빈 값은 무시
        assert_eq!(config.index.collection, DEFAULT_COLLECTION);
    }

    #[test]
    fn test_partial_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "retrieval": { "top_k": 3 }, "embedding": { "fallback": "fastembed" } }"#,
        )
        .unwrap();

        let config = RagConfig::from_file(&path).unwrap();
        assert_eq!(config.retrieval.top_k.get(), 3);
        assert_eq!(config.embedding.fallback, FallbackKind::Fastembed);
        assert_eq!(config.memory.token_limit, 3000);
    }

    #[test]
    fn test_validate_rejects_bad_overlap() {
        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://host:1/"), "http://host:1");
        assert_eq!(normalize_base_url("0.0.0.0:11434"), "http://0.0.0.0:11434");
    }
}
