//! Conversation Memory - 토큰 예산이 있는 대화 버퍼
//!
//! 새 턴이 들어오면 예산 안에 들어갈 때까지 가장 오래된 턴부터 밀어냅니다.
//! `append` 뒤에는 항상 `used_tokens() <= token_limit()`입니다.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use crate::knowledge::ScoredPassage;

use super::synth::DebugTrace;

/// 턴당 역할/형식 오버헤드 (토큰)
const TURN_OVERHEAD_TOKENS: usize = 4;
/// 토큰 추정용 문자 수
const CHARS_PER_TOKEN: usize = 4;

// ============================================================================
// Turn Types
// ============================================================================

/// 발화자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 답변에 사용된 출처 요약
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub file_name: String,
    pub score: f32,
    pub preview: String,
}

impl SourceSummary {
    /// 미리보기 최대 길이 (문자)
    pub const PREVIEW_CHARS: usize = 250;

    pub fn from_passage(passage: &ScoredPassage) -> Self {
        Self {
            file_name: passage.file_name().to_string(),
            score: passage.score,
            preview: passage.preview(Self::PREVIEW_CHARS),
        }
    }
}

/// 안전 추적 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TracePhase {
    Retrieval,
    Generation,
    Error,
}

/// 사용자에게 보여줘도 되는 처리 기록 한 줄
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub phase: TracePhase,
    pub message: String,
}

impl TraceEntry {
    pub fn new(phase: TracePhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

/// 턴 소요 시간 (표시용)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TurnTimings {
    pub retrieval: Duration,
    pub generation: Duration,
    pub total: Duration,
}

/// 실패한 어시스턴트 턴 표시
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TurnError {
    /// 생성 백엔드를 쓸 수 없어 답변 없음
    Unavailable { message: String },
    /// 스트리밍 도중 끊겨 답변이 불완전함
    Interrupted { message: String },
}

/// 대화 턴 (추가만 하고 수정하지 않음)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub sources: Vec<SourceSummary>,
    pub safe_trace: Vec<TraceEntry>,
    pub debug_trace: Option<DebugTrace>,
    pub timings: Option<TurnTimings>,
    pub error: Option<TurnError>,
}

impl ConversationTurn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sources: Vec::new(),
            safe_trace: Vec::new(),
            debug_trace: None,
            timings: None,
            error: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// 추정 토큰 수
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 토큰 수 추정: ceil(문자 수 / 4) + 턴 오버헤드
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) + TURN_OVERHEAD_TOKENS
}

// ============================================================================
// ConversationMemory
// ============================================================================

/// 대화 메모리 (FIFO, 토큰 예산)
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    token_limit: usize,
    turns: VecDeque<ConversationTurn>,
    used_tokens: usize,
}

impl ConversationMemory {
    /// 기본 토큰 예산
    pub const DEFAULT_TOKEN_LIMIT: usize = 3000;

    pub fn new(token_limit: usize) -> Self {
        Self {
            token_limit,
            turns: VecDeque::new(),
            used_tokens: 0,
        }
    }

    /// 턴 추가
    ///
    /// 예산 전체보다 큰 턴은 들어가지 않고 `false`를 돌려줍니다 (기존 턴은 유지).
    pub fn append(&mut self, turn: ConversationTurn) -> bool {
        self.admit([turn])
    }

    /// 질문과 답변을 함께 추가
    ///
    /// 둘을 합쳐 예산보다 크면 둘 다 넣지 않습니다. 답 없는 질문이 창에 남지 않습니다.
    pub fn append_exchange(
        &mut self,
        question: ConversationTurn,
        answer: ConversationTurn,
    ) -> bool {
        self.admit([question, answer])
    }

    fn admit<const N: usize>(&mut self, turns: [ConversationTurn; N]) -> bool {
        let cost: usize = turns.iter().map(ConversationTurn::estimated_tokens).sum();
        if cost > self.token_limit {
            tracing::debug!(
                "{} turn(s) of ~{} tokens exceed memory budget {}; not kept in context",
                N,
                cost,
                self.token_limit
            );
            return false;
        }

        while self.used_tokens + cost > self.token_limit {
            match self.turns.pop_front() {
                Some(evicted) => self.used_tokens -= evicted.estimated_tokens(),
                None => break,
            }
        }

        self.used_tokens += cost;
        self.turns.extend(turns);
        true
    }

    /// 현재 창의 턴들 (오래된 순)
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.used_tokens = 0;
    }

    pub fn used_tokens(&self) -> usize {
        self.used_tokens
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TOKEN_LIMIT)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_tokens(memory: &ConversationMemory) -> usize {
        memory.snapshot().iter().map(|t| t.estimated_tokens()).sum()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 4);
        assert_eq!(estimate_tokens("abcd"), 5);
        assert_eq!(estimate_tokens("abcde"), 6);
        assert!(estimate_tokens(&"x".repeat(100)) < estimate_tokens(&"x".repeat(101)) + 1);
    }

    #[test]
    fn test_fifo_eviction() {
        // 각 턴 = 40자 → 10 + 4 = 14 토큰
        let mut memory = ConversationMemory::new(30);
        memory.append(ConversationTurn::user("a".repeat(40)));
        memory.append(ConversationTurn::assistant("b".repeat(40)));
        memory.append(ConversationTurn::user("c".repeat(40)));

        let snapshot = memory.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].content.starts_with('b'));
        assert!(snapshot[1].content.starts_with('c'));
        assert_eq!(memory.used_tokens(), 28);
    }

    #[test]
    fn test_oversized_turn_not_admitted() {
        let mut memory = ConversationMemory::new(20);
        assert!(memory.append(ConversationTurn::user("short")));
        assert!(!memory.append(ConversationTurn::assistant("x".repeat(500))));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.snapshot()[0].content, "short");
    }

    #[test]
    fn test_exchange_admitted_together() {
        // 질문 14 + 답변 14 토큰, 예산 30
        let mut memory = ConversationMemory::new(30);
        assert!(memory.append_exchange(
            ConversationTurn::user("a".repeat(40)),
            ConversationTurn::assistant("b".repeat(40)),
        ));
        assert!(memory.append_exchange(
            ConversationTurn::user("c".repeat(40)),
            ConversationTurn::assistant("d".repeat(40)),
        ));

        let snapshot = memory.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role, Role::User);
        assert!(snapshot[0].content.starts_with('c'));
        assert!(snapshot[1].content.starts_with('d'));
    }

    #[test]
    fn test_oversized_answer_rejects_whole_exchange() {
        let mut memory = ConversationMemory::new(20);
        assert!(memory.append_exchange(
            ConversationTurn::user("hi"),
            ConversationTurn::assistant("hello"),
        ));

        // 답변 하나가 예산 전체보다 큼: 질문도 남기지 않음
        assert!(!memory.append_exchange(
            ConversationTurn::user("tell me everything"),
            ConversationTurn::assistant("x".repeat(500)),
        ));
        let snapshot = memory.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].content, "hi");
        assert_eq!(snapshot[1].content, "hello");
    }

    #[test]
    fn test_budget_holds_for_varied_sequences() {
        // 결정적 의사난수 길이 시퀀스
        let mut seed: u64 = 0x5eed;
        for limit in [8usize, 50, 300, 3000] {
            let mut memory = ConversationMemory::new(limit);
            for i in 0..200 {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let len = (seed >> 33) as usize % 400;
                let turn = if i % 2 == 0 {
                    ConversationTurn::user("y".repeat(len))
                } else {
                    ConversationTurn::assistant("z".repeat(len))
                };
                memory.append(turn);

                assert!(memory.used_tokens() <= memory.token_limit());
                assert_eq!(snapshot_tokens(&memory), memory.used_tokens());
            }
        }
    }

    #[test]
    fn test_clear() {
        let mut memory = ConversationMemory::default();
        memory.append(ConversationTurn::user("hello"));
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.used_tokens(), 0);
    }
}
