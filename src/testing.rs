//! 테스트용 가짜 구현 (cfg(test) 전용)

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;

use crate::chat::{
    CompletionBackend, CompletionRequest, ConversationTurn, FragmentStream, SessionState,
    TurnObserver,
};
use crate::embedding::{EmbeddingProvider, HashedEmbedding};
use crate::error::RagError;
use crate::ingest::{Document, DocumentSource, LoadedDocuments};
use crate::knowledge::{Metadata, ScoredPassage};

/// 파일 이름만 가진 문서
pub fn document(name: &str, text: &str) -> Document {
    Document {
        id: name.to_string(),
        text: text.to_string(),
        metadata: Metadata::from([
            ("file_name".to_string(), name.to_string()),
            ("file_path".to_string(), format!("/corpus/{name}")),
        ]),
    }
}

// ============================================================================
// StaticSource
// ============================================================================

/// 고정 문서 목록 소스
pub struct StaticSource {
    documents: Vec<Document>,
    warnings: Vec<String>,
}

impl StaticSource {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, path: &str) -> Self {
        self.warnings.push(path.to_string());
        self
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    async fn load(&self) -> crate::error::Result<LoadedDocuments> {
        Ok(LoadedDocuments {
            documents: self.documents.clone(),
            warnings: self
                .warnings
                .iter()
                .map(|p| RagError::IngestionWarning {
                    path: p.into(),
                    message: "unreadable".to_string(),
                })
                .collect(),
        })
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

// ============================================================================
// Embedding Fakes
// ============================================================================

/// 실패하는 임베딩 (복구 가능)
pub struct FailingEmbedding {
    inner: HashedEmbedding,
    failing: AtomicBool,
}

impl FailingEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashedEmbedding::new(dimension),
            failing: AtomicBool::new(true),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn probe(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }
}

/// 다른 이름의 모델인 척하는 해시 임베딩
pub struct NamedEmbedding {
    inner: HashedEmbedding,
    name: String,
}

impl NamedEmbedding {
    pub fn new(name: &str, dimension: usize) -> Self {
        Self {
            inner: HashedEmbedding::new(dimension),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for NamedEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 임베딩한 텍스트 수를 세는 래퍼
pub struct CountingEmbedding<E> {
    inner: E,
    texts: AtomicUsize,
}

impl<E: EmbeddingProvider> CountingEmbedding<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            texts: AtomicUsize::new(0),
        }
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: EmbeddingProvider> EmbeddingProvider for CountingEmbedding<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.texts.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// ScriptedCompletion
// ============================================================================

/// 정해진 조각을 돌려주는 생성 백엔드
pub struct ScriptedCompletion {
    fragments: Vec<String>,
    available: AtomicBool,
    interrupt_after: Mutex<Option<usize>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            available: AtomicBool::new(true),
            interrupt_after: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// `n`개 조각 뒤에 연결 끊김
    pub fn interrupt_after(&self, n: usize) {
        *self.interrupt_after.lock().unwrap() = Some(n);
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedCompletion {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn probe(&self) -> crate::error::Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RagError::GenerationUnavailable {
                message: "connection refused".to_string(),
                hint: "Start Ollama with `ollama serve`.".to_string(),
            })
        }
    }

    async fn complete(&self, request: CompletionRequest) -> crate::error::Result<FragmentStream> {
        self.probe().await?;
        self.requests.lock().unwrap().push(request);

        let limit = *self.interrupt_after.lock().unwrap();
        let mut items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        if let Some(n) = limit {
            items.truncate(n);
            items.push(Err(anyhow::anyhow!("connection reset by peer")));
        }

        Ok(futures::stream::iter(items).boxed())
    }
}

// ============================================================================
// RecordingObserver
// ============================================================================

/// 이벤트를 기록하는 관찰자
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub states: Vec<SessionState>,
    pub retrieved: Vec<Vec<ScoredPassage>>,
    pub retrieval_failures: usize,
    pub fragments: Vec<String>,
    pub turns: usize,
    stop_after: Option<usize>,
}

impl RecordingObserver {
    /// `n`개 조각 뒤 중단
    pub fn stop_after(n: usize) -> Self {
        Self {
            stop_after: Some(n),
            ..Default::default()
        }
    }
}

impl TurnObserver for RecordingObserver {
    fn on_state(&mut self, state: SessionState) {
        self.states.push(state);
    }

    fn on_retrieved(&mut self, passages: &[ScoredPassage], _elapsed: Duration) {
        self.retrieved.push(passages.to_vec());
    }

    fn on_retrieval_failed(&mut self, _error: &RagError) {
        self.retrieval_failures += 1;
    }

    fn on_fragment(&mut self, fragment: &str) -> ControlFlow<()> {
        self.fragments.push(fragment.to_string());
        match self.stop_after {
            Some(n) if self.fragments.len() >= n => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }

    fn on_turn(&mut self, _turn: &ConversationTurn) {
        self.turns += 1;
    }
}
