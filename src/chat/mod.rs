//! Chat 모듈 - 대화 메모리, 답변 합성, 세션 상태 머신

mod memory;
mod ollama;
mod session;
mod synth;

pub use memory::{
    estimate_tokens, ConversationMemory, ConversationTurn, Role, SourceSummary, TraceEntry,
    TracePhase, TurnError, TurnTimings,
};
pub use ollama::OllamaChat;
pub use session::{NoopObserver, Pipeline, Session, SessionState, TurnObserver, TurnOutcome};
pub use synth::{
    AnswerStream, ChatMessage, ChatRole, CompletionBackend, CompletionRequest, DebugEvent,
    DebugEventKind, DebugStage, DebugTrace, FragmentStream, Synthesizer,
};
