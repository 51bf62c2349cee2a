//! Synthesizer - 검색 결과 + 대화 기록으로 답변 스트리밍
//!
//! 요청 구성: 시스템 메시지(프롬프트 + 컨텍스트 블록) → 이전 턴들 → 새 질문.
//! 백엔드에 닿지 못하면 첫 조각 전에 `GenerationUnavailable`,
//! 도중에 끊기면 마지막 항목으로 `GenerationInterrupted { partial }`을 냅니다.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::SynthesisConfig;
use crate::error::{RagError, Result};
use crate::knowledge::ScoredPassage;

use super::memory::{ConversationTurn, Role};

// ============================================================================
// Backend Types
// ============================================================================

/// 채팅 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 채팅 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// 생성 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
}

/// 백엔드가 돌려주는 텍스트 조각 스트림
///
/// 항목 에러는 스트리밍 도중 실패입니다.
pub type FragmentStream = BoxStream<'static, anyhow::Result<String>>;

/// 생성 백엔드 트레이트
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// 모델 이름
    fn model(&self) -> &str;

    /// 상태 확인 (실패 시 `GenerationUnavailable`)
    async fn probe(&self) -> Result<()>;

    /// 스트리밍 생성 시작
    ///
    /// 연결 실패/요청 거부는 스트림을 만들기 전에 `GenerationUnavailable`입니다.
    async fn complete(&self, request: CompletionRequest) -> Result<FragmentStream>;
}

// ============================================================================
// Debug Trace
// ============================================================================

/// 디버그 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugEventKind {
    Templating,
    Llm,
}

/// 시작/끝
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugStage {
    Start,
    End,
}

/// 디버그 이벤트 한 건
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugEvent {
    pub kind: DebugEventKind,
    pub stage: DebugStage,
    pub payload: serde_json::Value,
}

/// 합성 과정 디버그 기록 (참고용)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugTrace {
    pub events: Vec<DebugEvent>,
}

impl DebugTrace {
    fn push(&mut self, kind: DebugEventKind, stage: DebugStage, payload: serde_json::Value) {
        self.events.push(DebugEvent {
            kind,
            stage,
            payload,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 사람이 읽을 수 있는 줄 목록
    pub fn lines(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|e| {
                let stage = match e.stage {
                    DebugStage::Start => "start",
                    DebugStage::End => "end",
                };
                let kind = match e.kind {
                    DebugEventKind::Templating => "templating",
                    DebugEventKind::Llm => "llm",
                };
                format!("{kind}.{stage} {}", e.payload)
            })
            .collect()
    }
}

// ============================================================================
// AnswerStream
// ============================================================================

/// 답변 스트림
///
/// 한 번만 소비할 수 있고, drop하면 HTTP 연결도 해제됩니다.
pub struct AnswerStream {
    inner: FragmentStream,
    sources: Vec<ScoredPassage>,
    trace: DebugTrace,
    model: String,
    partial: String,
    fragments: usize,
    started: Instant,
    finished: bool,
}

impl AnswerStream {
    /// 실제 컨텍스트로 사용된 청크들 (순위순)
    pub fn sources(&self) -> &[ScoredPassage] {
        &self.sources
    }

    pub fn debug_trace(&self) -> &DebugTrace {
        &self.trace
    }

    /// 지금까지 받은 텍스트
    pub fn text_so_far(&self) -> &str {
        &self.partial
    }

    fn finish(&mut self, error: Option<&str>) {
        self.finished = true;
        let mut payload = json!({
            "model": self.model,
            "fragments": self.fragments,
            "elapsed_ms": self.started.elapsed().as_millis() as u64,
        });
        if let Some(error) = error {
            payload["error"] = json!(error);
        }
        self.trace.push(DebugEventKind::Llm, DebugStage::End, payload);
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => {
                self.fragments += 1;
                self.partial.push_str(&fragment);
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => {
                let message = format!("{:#}", e);
                self.finish(Some(&message));
                Poll::Ready(Some(Err(RagError::GenerationInterrupted {
                    partial: self.partial.clone(),
                    message,
                })))
            }
            Poll::Ready(None) => {
                self.finish(None);
                Poll::Ready(None)
            }
        }
    }
}

impl std::fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerStream")
            .field("model", &self.model)
            .field("sources", &self.sources.len())
            .field("fragments", &self.fragments)
            .field("finished", &self.finished)
            .finish()
    }
}

// ============================================================================
// Synthesizer
// ============================================================================

/// 답변 합성기
pub struct Synthesizer {
    backend: Arc<dyn CompletionBackend>,
    config: SynthesisConfig,
}

impl Synthesizer {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: SynthesisConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    /// 답변 스트리밍 시작
    pub async fn stream_answer(
        &self,
        query: &str,
        history: &[ConversationTurn],
        passages: &[ScoredPassage],
    ) -> Result<AnswerStream> {
        let mut trace = DebugTrace::default();

        trace.push(
            DebugEventKind::Templating,
            DebugStage::Start,
            json!({ "passages": passages.len(), "history_turns": history.len() }),
        );
        let sources = self.select_context(passages);
        let request = self.build_request(query, history, &sources);
        trace.push(
            DebugEventKind::Templating,
            DebugStage::End,
            json!({
                "context_passages": sources.len(),
                "messages": request.messages.len(),
            }),
        );

        let model = self.backend.model().to_string();
        trace.push(
            DebugEventKind::Llm,
            DebugStage::Start,
            json!({ "model": model, "messages": request.messages.len() }),
        );

        let started = Instant::now();
        let inner = self.backend.complete(request).await?;

        Ok(AnswerStream {
            inner,
            sources,
            trace,
            model,
            partial: String::new(),
            fragments: 0,
            started,
            finished: false,
        })
    }

    /// 컨텍스트 예산 안에서 순위순으로 청크 선택
    ///
    /// 예산을 넘는 첫 청크에서 멈춥니다. 첫 청크는 예산보다 커도 포함합니다.
    fn select_context(&self, passages: &[ScoredPassage]) -> Vec<ScoredPassage> {
        let mut used = 0;
        let mut selected = Vec::new();

        for passage in passages {
            let size = passage.text.chars().count();
            if !selected.is_empty() && used + size > self.config.max_context_chars {
                break;
            }
            used += size;
            selected.push(passage.clone());
        }

        selected
    }

    /// 채팅 요청 구성
    fn build_request(
        &self,
        query: &str,
        history: &[ConversationTurn],
        sources: &[ScoredPassage],
    ) -> CompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new(ChatRole::System, self.system_message(sources)));

        for turn in history {
            let role = match turn.role {
                Role::User => ChatRole::User,
                Role::Assistant => ChatRole::Assistant,
            };
            messages.push(ChatMessage::new(role, turn.content.clone()));
        }

        messages.push(ChatMessage::new(ChatRole::User, query));
        CompletionRequest { messages }
    }

    fn system_message(&self, sources: &[ScoredPassage]) -> String {
        let mut message = self.config.system_prompt.trim().to_string();

        if sources.is_empty() {
            message.push_str(
                "\n\nNo context documents are available for this question. \
                 Answer from general knowledge and say that no local documents were used.",
            );
            return message;
        }

        message.push_str("\n\nContext information is below.\n---------------------\n");
        for (i, passage) in sources.iter().enumerate() {
            message.push_str(&format!(
                "[{}] file: {}\n{}\n\n",
                i + 1,
                passage.file_name(),
                passage.text.trim()
            ));
        }
        message.push_str("---------------------\n");
        message.push_str(
            "Use the context and the conversation to answer. \
             If the context does not contain the answer, say so.",
        );
        message
    }
}

// ============================================================================
// Tests
// ============================================================================
