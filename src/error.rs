//! 에러 타입
//!
//! 파이프라인 전체에서 쓰는 에러 종류입니다.
//! 어댑터 내부는 `anyhow`로 컨텍스트를 쌓고, 컴포넌트 경계에서 `RagError`로 변환합니다.

use std::path::PathBuf;

use thiserror::Error;

/// 에러 분류
///
/// 설정 에러만 시작 단계에서 치명적이고, 나머지는 턴 단위로 복구됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    BackendUnavailable,
    RetrievalFailed,
    GenerationUnavailable,
    GenerationInterrupted,
    IngestionWarning,
    Storage,
}

/// 프로바이더 생성 실패 원인
#[derive(Debug, Clone, Error)]
pub enum ProviderInitError {
    /// 필요한 기능/크레이트가 빌드에 포함되지 않음
    #[error("{provider}: missing dependency ({message})")]
    MissingDependency { provider: String, message: String },

    /// 백엔드에 연결할 수 없음
    #[error("{provider}: backend unreachable ({message})")]
    Unreachable { provider: String, message: String },

    /// 백엔드는 살아있지만 모델이 없음
    #[error("{provider}: model '{model}' is not available")]
    ModelMissing { provider: String, model: String },

    /// 그 외 (잘못된 응답, 잘못된 설정 등)
    #[error("{provider}: {message}")]
    Invalid { provider: String, message: String },
}

impl ProviderInitError {
    /// 사용자에게 보여줄 해결 방법
    pub fn hint(&self) -> String {
        match self {
            Self::MissingDependency { .. } => {
                "Rebuild with `cargo build --features fastembed` or use `--fallback hashed`."
                    .to_string()
            }
            Self::Unreachable { .. } => "Start the Ollama daemon with `ollama serve`.".to_string(),
            Self::ModelMissing { model, .. } => format!("Pull the model with `ollama pull {model}`."),
            Self::Invalid { .. } => "Check the embedding settings in the configuration.".to_string(),
        }
    }
}

/// 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 치명적 설정 에러 (차원 불일치, 컬렉션 없음 등)
    #[error("Configuration error: {message}")]
    Configuration { message: String, hint: String },

    /// 선호/대체 임베딩 프로바이더 모두 생성 실패
    #[error("No embedding provider available (preferred: {preferred}; fallback: {fallback})")]
    NoEmbeddingProvider {
        preferred: ProviderInitError,
        fallback: ProviderInitError,
    },

    /// 임베딩/생성 백엔드에 연결할 수 없음
    #[error("{backend} unavailable: {message}")]
    BackendUnavailable {
        backend: String,
        message: String,
        hint: String,
    },

    /// 검색 실패 - 컨텍스트 없이 계속 진행
    #[error("Retrieval failed: {message}")]
    RetrievalFailed { message: String, hint: String },

    /// 생성 백엔드가 첫 토큰 전에 실패
    #[error("Generation unavailable: {message}")]
    GenerationUnavailable { message: String, hint: String },

    /// 스트리밍 도중 실패 (부분 답변 보존)
    #[error("Generation interrupted after {} chars: {message}", partial.len())]
    GenerationInterrupted { partial: String, message: String },

    /// 문서 하나를 읽지 못함 (인덱싱은 계속됨)
    #[error("Skipped {path:?}: {message}")]
    IngestionWarning { path: PathBuf, message: String },

    /// 인덱스/매니페스트 저장소 에러
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub fn configuration(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            hint: hint.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } | Self::NoEmbeddingProvider { .. } => {
                ErrorKind::Configuration
            }
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::RetrievalFailed { .. } => ErrorKind::RetrievalFailed,
            Self::GenerationUnavailable { .. } => ErrorKind::GenerationUnavailable,
            Self::GenerationInterrupted { .. } => ErrorKind::GenerationInterrupted,
            Self::IngestionWarning { .. } => ErrorKind::IngestionWarning,
            Self::Storage(_) | Self::Io(_) => ErrorKind::Storage,
        }
    }

    /// 시작을 중단해야 하는 에러인지
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// 해결 방법 (없으면 None)
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Configuration { hint, .. }
            | Self::BackendUnavailable { hint, .. }
            | Self::RetrievalFailed { hint, .. }
            | Self::GenerationUnavailable { hint, .. } => Some(hint.clone()),
            Self::NoEmbeddingProvider {
                preferred,
                fallback,
            } => Some(format!("{} Or: {}", preferred.hint(), fallback.hint())),
            Self::GenerationInterrupted { .. } => {
                Some("The answer is incomplete; send the question again.".to_string())
            }
            Self::IngestionWarning { .. } => {
                Some("Check that the file is readable and in a supported format.".to_string())
            }
            Self::Storage(_) | Self::Io(_) => None,
        }
    }

    /// 화면 표시용 메시지 (에러 + 해결 방법)
    pub fn user_message(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{self}\n{hint}"),
            None => self.to_string(),
        }
    }
}

/// 파이프라인 Result 타입
pub type Result<T> = std::result::Result<T, RagError>;
