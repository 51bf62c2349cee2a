//! Session Orchestrator - 턴 단위 상태 머신
//!
//! ```text
//! Idle → Retrieving → Synthesizing ─────────┐
//!             │                             ├→ Idle
//!             └→ DegradedSynthesizing ──────┤
//!                        │                  │
//!                        └→ Failed ─────────┘
//! ```
//!
//! 메모리/기록에는 턴이 끝난 뒤 마지막에 한 번만 추가합니다.
//! 그래서 도중에 멈추거나 `run_turn` future를 drop해도 아무것도 남지 않습니다.

use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::embedding::{select_from_config, SelectedEmbedding};
use crate::error::{RagError, Result};
use crate::knowledge::{LanceVectorIndex, Retriever, ScoredPassage};

use super::memory::{
    ConversationMemory, ConversationTurn, SourceSummary, TraceEntry, TracePhase, TurnError,
    TurnTimings,
};
use super::ollama::OllamaChat;
use super::synth::{AnswerStream, Synthesizer};

// ============================================================================
// Types
// ============================================================================

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Retrieving,
    Synthesizing,
    /// 검색 실패, 컨텍스트 없이 생성 중
    DegradedSynthesizing,
    /// 생성 실패, 에러 턴 기록 후 Idle로 돌아감
    Failed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Retrieving => "retrieving",
            Self::Synthesizing => "synthesizing",
            Self::DegradedSynthesizing => "synthesizing (no context)",
            Self::Failed => "failed",
        }
    }
}

/// 턴 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// 컨텍스트와 함께 답변
    Answered,
    /// 검색 실패, 컨텍스트 없이 답변
    Degraded,
    /// 부분 답변만 기록 (메모리에는 미반영)
    Interrupted,
    /// 생성 불가, 에러 턴 기록
    Failed,
    /// 관찰자가 중단, 아무것도 기록하지 않음
    Abandoned,
}

/// 턴 진행 이벤트 수신자 (CLI 등 표시 계층)
///
/// 기본 구현은 모두 아무것도 하지 않습니다.
pub trait TurnObserver: Send {
    fn on_state(&mut self, _state: SessionState) {}

    /// 검색 성공 (빈 결과 포함)
    fn on_retrieved(&mut self, _passages: &[ScoredPassage], _elapsed: Duration) {}

    /// 검색 실패 (컨텍스트 없이 계속)
    fn on_retrieval_failed(&mut self, _error: &RagError) {}

    /// 답변 조각. `Break`를 돌려주면 턴을 버립니다.
    fn on_fragment(&mut self, _fragment: &str) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// 기록된 어시스턴트 턴
    fn on_turn(&mut self, _turn: &ConversationTurn) {}
}

/// 아무것도 하지 않는 관찰자
#[derive(Debug, Default)]
pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

// ============================================================================
// Pipeline
// ============================================================================

/// 세션들이 공유하는 검색 + 합성 파이프라인
pub struct Pipeline {
    retriever: Retriever,
    synthesizer: Synthesizer,
    top_k: NonZeroUsize,
    memory_token_limit: usize,
}

impl Pipeline {
    pub fn new(
        retriever: Retriever,
        synthesizer: Synthesizer,
        top_k: NonZeroUsize,
        memory_token_limit: usize,
    ) -> Self {
        Self {
            retriever,
            synthesizer,
            top_k,
            memory_token_limit,
        }
    }

    /// 설정으로 서빙 파이프라인 구성
    ///
    /// 임베딩 프로바이더 선택 → 컬렉션 열기 → Ollama 채팅 백엔드 순서입니다.
    /// 컬렉션이 없거나 다른 임베딩 프로바이더/차원으로 만들어졌으면 설정 에러로 시작하지 않습니다.
    pub async fn open(config: &RagConfig) -> Result<(Self, SelectedEmbedding)> {
        let selected = select_from_config(config).await?;
        if let Some(warning) = selected.warning() {
            tracing::warn!("{}", warning);
        }

        let index = LanceVectorIndex::open(&config.index.path, &config.index.collection).await?;
        let retriever = Retriever::new(selected.provider(), Arc::new(index))?;

        let chat = OllamaChat::new(&config.ollama)?;
        let synthesizer = Synthesizer::new(Arc::new(chat), config.synthesis.clone());

        tracing::info!(
            "Pipeline ready: collection '{}', embeddings '{}', model '{}'",
            retriever.collection(),
            retriever.provider_name(),
            config.ollama.llm_model
        );

        Ok((
            Self::new(
                retriever,
                synthesizer,
                config.retrieval.top_k,
                config.memory.token_limit,
            ),
            selected,
        ))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    pub fn top_k(&self) -> NonZeroUsize {
        self.top_k
    }

    /// 생성 백엔드 상태 확인
    pub async fn probe_generation(&self) -> Result<()> {
        self.synthesizer.backend().probe().await
    }

    /// 임베딩 백엔드 상태 확인 (실패해도 턴은 컨텍스트 없이 답함)
    pub async fn probe_embedding(&self) -> Result<()> {
        self.retriever.probe_embedding().await
    }
}

// ============================================================================
// Session
// ============================================================================

/// 대화 세션 (메모리와 기록을 소유, 저장하지 않음)
pub struct Session {
    id: Uuid,
    pipeline: Arc<Pipeline>,
    memory: ConversationMemory,
    history: Vec<ConversationTurn>,
    state: SessionState,
}

impl Session {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let memory = ConversationMemory::new(pipeline.memory_token_limit);
        Self {
            id: Uuid::new_v4(),
            pipeline,
            memory,
            history: Vec::new(),
            state: SessionState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 전체 대화 기록 (에러 턴 포함)
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// 다음 질문에 쓰일 대화 창
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// 대화 초기화
    pub fn reset(&mut self) {
        self.memory.clear();
        self.history.clear();
        self.state = SessionState::Idle;
    }

    fn transition(&mut self, state: SessionState, observer: &mut dyn TurnObserver) {
        tracing::debug!(session = %self.id, "{} -> {}", self.state.label(), state.label());
        self.state = state;
        observer.on_state(state);
    }

    /// 질문 한 턴 실행
    ///
    /// 턴 에러는 세션을 끝내지 않습니다. 결과는 `history()` 마지막 턴에 기록됩니다.
    pub async fn run_turn(&mut self, query: &str, observer: &mut dyn TurnObserver) -> TurnOutcome {
        let turn_start = Instant::now();
        let pipeline = Arc::clone(&self.pipeline);

        // 1. 검색
        self.transition(SessionState::Retrieving, observer);
        let retrieval_start = Instant::now();
        let retrieval = pipeline.retriever.retrieve(query, pipeline.top_k).await;
        let retrieval_elapsed = retrieval_start.elapsed();

        let mut trace = Vec::new();
        let (passages, degraded) = match retrieval {
            Ok(passages) => {
                if passages.is_empty() {
                    trace.push(TraceEntry::new(
                        TracePhase::Retrieval,
                        "No relevant context found.",
                    ));
                } else {
                    trace.push(TraceEntry::new(
                        TracePhase::Retrieval,
                        format!("Found {} top passages (top-k).", passages.len()),
                    ));
                    for (i, passage) in passages.iter().enumerate() {
                        trace.push(TraceEntry::new(
                            TracePhase::Retrieval,
                            format!(
                                "Context {}: file=`{}` | score={:.3}",
                                i + 1,
                                passage.file_name(),
                                passage.score
                            ),
                        ));
                    }
                }
                observer.on_retrieved(&passages, retrieval_elapsed);
                self.transition(SessionState::Synthesizing, observer);
                (passages, false)
            }
            Err(e) => {
                tracing::warn!(session = %self.id, "Retrieval failed, answering without context: {}", e);
                trace.push(TraceEntry::new(
                    TracePhase::Error,
                    format!("Retrieval failed: {}", e),
                ));
                observer.on_retrieval_failed(&e);
                self.transition(SessionState::DegradedSynthesizing, observer);
                (Vec::new(), true)
            }
        };
        trace.push(TraceEntry::new(
            TracePhase::Retrieval,
            format!("Retrieval time: {:.2}s", retrieval_elapsed.as_secs_f64()),
        ));

        // 2. 생성
        let generation_start = Instant::now();
        let snapshot = self.memory.snapshot();
        let mut stream = match pipeline
            .synthesizer
            .stream_answer(query, &snapshot, &passages)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                let timings = TurnTimings {
                    retrieval: retrieval_elapsed,
                    generation: generation_start.elapsed(),
                    total: turn_start.elapsed(),
                };
                return self.fail_turn(query, &e, trace, timings, observer);
            }
        };

        let mut interruption = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    if observer.on_fragment(&fragment).is_break() {
                        tracing::info!(session = %self.id, "Turn abandoned by caller");
                        self.transition(SessionState::Idle, observer);
                        return TurnOutcome::Abandoned;
                    }
                }
                Err(e) => {
                    interruption = Some(e);
                    break;
                }
            }
        }

        let generation_elapsed = generation_start.elapsed();
        let timings = TurnTimings {
            retrieval: retrieval_elapsed,
            generation: generation_elapsed,
            total: turn_start.elapsed(),
        };

        if let Some(error) = interruption {
            if stream.text_so_far().is_empty() {
                return self.fail_turn(query, &error, trace, timings, observer);
            }
            return self.interrupted_turn(query, &error, &stream, trace, timings, observer);
        }

        // 3. 성공: 메모리와 기록에 추가
        trace.push(TraceEntry::new(
            TracePhase::Generation,
            format!("Answer generation time: {:.2}s", generation_elapsed.as_secs_f64()),
        ));

        let mut answer = ConversationTurn::assistant(stream.text_so_far());
        answer.sources = stream.sources().iter().map(SourceSummary::from_passage).collect();
        answer.safe_trace = trace;
        answer.debug_trace = Some(stream.debug_trace().clone());
        answer.timings = Some(timings);

        let question = ConversationTurn::user(query);
        if !self.memory.append_exchange(question.clone(), answer.clone()) {
            tracing::info!(
                session = %self.id,
                "Exchange too long for conversation memory; kept in history only"
            );
        }
        self.history.push(question);
        self.history.push(answer);

        if let Some(turn) = self.history.last() {
            observer.on_turn(turn);
        }
        self.transition(SessionState::Idle, observer);

        tracing::info!(
            session = %self.id,
            "Turn answered in {:.2}s (retrieval {:.2}s, generation {:.2}s){}",
            timings.total.as_secs_f64(),
            timings.retrieval.as_secs_f64(),
            timings.generation.as_secs_f64(),
            if degraded { " without context" } else { "" }
        );

        if degraded {
            TurnOutcome::Degraded
        } else {
            TurnOutcome::Answered
        }
    }

    /// 생성 불가: 에러 턴 하나, 출처 없음, 메모리 유지
    fn fail_turn(
        &mut self,
        query: &str,
        error: &RagError,
        trace: Vec<TraceEntry>,
        timings: TurnTimings,
        observer: &mut dyn TurnObserver,
    ) -> TurnOutcome {
        self.transition(SessionState::Failed, observer);

        let unavailable = match error {
            RagError::GenerationInterrupted { message, .. } => RagError::GenerationUnavailable {
                message: message.clone(),
                hint: "Check that `ollama serve` is running, then send the question again."
                    .to_string(),
            },
            _ => return self.record_failure(query, error, trace, timings, observer),
        };
        self.record_failure(query, &unavailable, trace, timings, observer)
    }

    fn record_failure(
        &mut self,
        query: &str,
        error: &RagError,
        trace: Vec<TraceEntry>,
        timings: TurnTimings,
        observer: &mut dyn TurnObserver,
    ) -> TurnOutcome {
        tracing::warn!(session = %self.id, "Generation failed: {}", error);

        let mut answer = ConversationTurn::assistant(error.user_message());
        answer.safe_trace = trace;
        answer.timings = Some(timings);
        answer.error = Some(TurnError::Unavailable {
            message: error.to_string(),
        });

        self.history.push(ConversationTurn::user(query));
        self.history.push(answer);

        if let Some(turn) = self.history.last() {
            observer.on_turn(turn);
        }
        self.transition(SessionState::Idle, observer);
        TurnOutcome::Failed
    }

    /// 도중 끊김: 부분 답변을 기록만 하고 메모리는 유지
    fn interrupted_turn(
        &mut self,
        query: &str,
        error: &RagError,
        stream: &AnswerStream,
        mut trace: Vec<TraceEntry>,
        timings: TurnTimings,
        observer: &mut dyn TurnObserver,
    ) -> TurnOutcome {
        tracing::warn!(session = %self.id, "Answer interrupted: {}", error);
        trace.push(TraceEntry::new(
            TracePhase::Error,
            format!("Answer interrupted: {}", error),
        ));

        let mut answer = ConversationTurn::assistant(stream.text_so_far());
        answer.sources = stream.sources().iter().map(SourceSummary::from_passage).collect();
        answer.safe_trace = trace;
        answer.debug_trace = Some(stream.debug_trace().clone());
        answer.timings = Some(timings);
        answer.error = Some(TurnError::Interrupted {
            message: error.user_message(),
        });

        self.history.push(ConversationTurn::user(query));
        self.history.push(answer);

        if let Some(turn) = self.history.last() {
            observer.on_turn(turn);
        }
        self.transition(SessionState::Idle, observer);
        TurnOutcome::Interrupted
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SynthesisConfig;
    use crate::embedding::{EmbeddingProvider, HashedEmbedding};
    use crate::knowledge::{EmbeddingSpace, Indexer, MemoryVectorIndex};
    use crate::testing::{document, FailingEmbedding, RecordingObserver, ScriptedCompletion, StaticSource};

    const DIM: usize = 128;

    async fn pipeline_with(
        provider: Arc<dyn EmbeddingProvider>,
        backend: Arc<ScriptedCompletion>,
    ) -> Arc<Pipeline> {
        pipeline_with_memory(provider, backend, 3000).await
    }

    async fn pipeline_with_memory(
        provider: Arc<dyn EmbeddingProvider>,
        backend: Arc<ScriptedCompletion>,
        memory_token_limit: usize,
    ) -> Arc<Pipeline> {
        let index = Arc::new(MemoryVectorIndex::new("docs", EmbeddingSpace::new("hashed", DIM)));
        let source = StaticSource::new(vec![
            document("volcano.md", "Volcanoes erupt when magma rises through the crust."),
            document("bread.md", "Sourdough bread needs a lively starter."),
        ]);
        Indexer::default()
            .build(&source, &HashedEmbedding::new(DIM), index.as_ref())
            .await
            .unwrap();

        let retriever = Retriever::new(provider, index).unwrap();
        let synthesizer = Synthesizer::new(backend, SynthesisConfig::default());
        Arc::new(Pipeline::new(
            retriever,
            synthesizer,
            NonZeroUsize::new(2).unwrap(),
            memory_token_limit,
        ))
    }

    async fn healthy(backend: Arc<ScriptedCompletion>) -> Arc<Pipeline> {
        pipeline_with(Arc::new(HashedEmbedding::new(DIM)), backend).await
    }

    #[tokio::test]
    async fn test_successful_turn() {
        let backend = Arc::new(ScriptedCompletion::new(["Magma ", "rises."]));
        let mut session = Session::new(healthy(backend).await);
        let mut observer = RecordingObserver::default();

        let outcome = session.run_turn("Why do volcanoes erupt?", &mut observer).await;

        assert_eq!(outcome, TurnOutcome::Answered);
        assert_eq!(
            observer.states,
            vec![SessionState::Retrieving, SessionState::Synthesizing, SessionState::Idle]
        );
        assert_eq!(observer.fragments.concat(), "Magma rises.");
        assert_eq!(observer.turns, 1);

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.memory().len(), 2);
        let answer = &session.history()[1];
        assert_eq!(answer.content, "Magma rises.");
        assert!(!answer.sources.is_empty());
        assert_eq!(answer.sources[0].file_name, "volcano.md");
        assert!(answer.debug_trace.is_some());
        assert!(answer.timings.is_some());
        assert!(answer
            .safe_trace
            .iter()
            .any(|t| t.phase == TracePhase::Generation));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_unreachable_generation_records_one_error_turn() {
        let backend = Arc::new(ScriptedCompletion::new(["unused"]));
        backend.set_available(false);
        let mut session = Session::new(healthy(backend).await);
        let mut observer = RecordingObserver::default();

        let outcome = session.run_turn("Why do volcanoes erupt?", &mut observer).await;

        assert_eq!(outcome, TurnOutcome::Failed);
        assert!(observer.fragments.is_empty());
        assert!(observer.states.contains(&SessionState::Failed));
        assert_eq!(observer.states.last(), Some(&SessionState::Idle));

        let assistant: Vec<_> = session
            .history()
            .iter()
            .filter(|t| t.role == crate::chat::Role::Assistant)
            .collect();
        assert_eq!(assistant.len(), 1);
        let turn = assistant[0];
        assert!(turn.sources.is_empty());
        assert!(matches!(turn.error, Some(TurnError::Unavailable { .. })));
        assert!(turn.content.contains("ollama serve"));
        assert!(turn
            .safe_trace
            .iter()
            .all(|t| t.phase == TracePhase::Retrieval));
        assert!(session.memory().is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades() {
        let backend = Arc::new(ScriptedCompletion::new(["I have no documents, but..."]));
        let pipeline = pipeline_with(Arc::new(FailingEmbedding::new(DIM)), backend.clone()).await;
        let mut session = Session::new(pipeline);
        let mut observer = RecordingObserver::default();

        let outcome = session.run_turn("Why do volcanoes erupt?", &mut observer).await;

        assert_eq!(outcome, TurnOutcome::Degraded);
        assert!(observer.states.contains(&SessionState::DegradedSynthesizing));
        assert!(observer.retrieval_failures == 1);

        let answer = session.history().last().unwrap();
        assert!(answer.sources.is_empty());
        assert!(!answer.content.is_empty());
        assert!(answer.error.is_none());
        assert!(answer.safe_trace.iter().any(|t| t.phase == TracePhase::Error));
        assert_eq!(session.memory().len(), 2);

        // 컨텍스트 블록 없이 질문이 전달됨
        let request = backend.last_request().unwrap();
        assert!(request.messages[0].content.contains("No context documents"));
    }

    #[tokio::test]
    async fn test_oversized_answer_leaves_no_orphan_question() {
        // 질문은 예산 안, 답변은 예산보다 큼
        let long_answer = "lava ".repeat(40);
        let backend = Arc::new(ScriptedCompletion::new([long_answer.clone()]));
        let pipeline =
            pipeline_with_memory(Arc::new(HashedEmbedding::new(DIM)), backend.clone(), 30).await;
        let mut session = Session::new(pipeline);

        let outcome = session.run_turn("Why do volcanoes erupt?", &mut NoopObserver).await;

        assert_eq!(outcome, TurnOutcome::Answered);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1].content, long_answer);
        assert!(session.memory().is_empty());

        // 다음 요청에 답 없는 질문이 섞이지 않음
        session.run_turn("And then?", &mut NoopObserver).await;
        let request = backend.last_request().unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].content, "And then?");
    }

    #[tokio::test]
    async fn test_embedding_readiness_check() {
        let provider = Arc::new(FailingEmbedding::new(DIM));
        let backend = Arc::new(ScriptedCompletion::new(["unused"]));
        let pipeline = pipeline_with(provider.clone(), backend).await;

        let err = pipeline.probe_embedding().await.unwrap_err();
        assert!(matches!(err, RagError::RetrievalFailed { .. }));
        assert!(!err.is_fatal());

        provider.set_failing(false);
        assert!(pipeline.probe_embedding().await.is_ok());
    }

    #[tokio::test]
    async fn test_interrupted_answer_kept_out_of_memory() {
        let backend = Arc::new(ScriptedCompletion::new(["Partial ", "answer ", "lost"]));
        backend.interrupt_after(2);
        let mut session = Session::new(healthy(backend).await);

        let outcome = session.run_turn("Tell me about bread", &mut NoopObserver).await;

        assert_eq!(outcome, TurnOutcome::Interrupted);
        let answer = session.history().last().unwrap();
        assert_eq!(answer.content, "Partial answer ");
        assert!(matches!(answer.error, Some(TurnError::Interrupted { .. })));
        assert!(session.memory().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_before_text_is_failure() {
        let backend = Arc::new(ScriptedCompletion::new(["never"]));
        backend.interrupt_after(0);
        let mut session = Session::new(healthy(backend).await);

        let outcome = session.run_turn("Tell me about bread", &mut NoopObserver).await;

        assert_eq!(outcome, TurnOutcome::Failed);
        let answer = session.history().last().unwrap();
        assert!(matches!(answer.error, Some(TurnError::Unavailable { .. })));
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_turn_leaves_nothing() {
        let backend = Arc::new(ScriptedCompletion::new(["one ", "two ", "three"]));
        let mut session = Session::new(healthy(backend).await);
        let mut observer = RecordingObserver::stop_after(1);

        let outcome = session.run_turn("Why do volcanoes erupt?", &mut observer).await;

        assert_eq!(outcome, TurnOutcome::Abandoned);
        assert_eq!(observer.fragments, vec!["one "]);
        assert!(session.history().is_empty());
        assert!(session.memory().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_outage_then_recovery() {
        let backend = Arc::new(ScriptedCompletion::new(["Recovered answer."]));
        backend.set_available(false);
        let mut session = Session::new(healthy(backend.clone()).await);

        let first = session.run_turn("Why do volcanoes erupt?", &mut NoopObserver).await;
        assert_eq!(first, TurnOutcome::Failed);
        assert!(session.memory().is_empty());

        backend.set_available(true);
        let second = session.run_turn("Why do volcanoes erupt?", &mut NoopObserver).await;
        assert_eq!(second, TurnOutcome::Answered);

        assert_eq!(session.history().len(), 4);
        assert_eq!(session.memory().len(), 2);
        assert_eq!(session.history()[3].content, "Recovered answer.");
        assert!(session.history()[3].error.is_none());

        // 실패한 턴은 다음 요청의 대화 기록에 들어가지 않음
        let request = backend.last_request().unwrap();
        assert_eq!(request.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_history_feeds_next_turn() {
        let backend = Arc::new(ScriptedCompletion::new(["Answer."]));
        let mut session = Session::new(healthy(backend.clone()).await);

        session.run_turn("first", &mut NoopObserver).await;
        session.run_turn("second", &mut NoopObserver).await;

        let request = backend.last_request().unwrap();
        let contents: Vec<&str> = request.messages[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "Answer.", "second"]);
    }

    #[tokio::test]
    async fn test_sessions_share_pipeline() {
        let backend = Arc::new(ScriptedCompletion::new(["Shared."]));
        let pipeline = healthy(backend).await;
        let mut a = Session::new(Arc::clone(&pipeline));
        let mut b = Session::new(Arc::clone(&pipeline));
        assert_ne!(a.id(), b.id());

        let mut obs_a = NoopObserver;
        let mut obs_b = NoopObserver;
        let (ra, rb) = tokio::join!(
            a.run_turn("volcano", &mut obs_a),
            b.run_turn("bread", &mut obs_b)
        );

        assert_eq!(ra, TurnOutcome::Answered);
        assert_eq!(rb, TurnOutcome::Answered);
        assert_eq!(a.history()[0].content, "volcano");
        assert_eq!(b.history()[0].content, "bread");
    }
}
