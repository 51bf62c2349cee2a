//! Text Chunking Module
//!
//! 문서를 검색 단위(청크)로 분할합니다.
//! 모든 청크는 원문 바이트 오프셋(`start..end`)을 가지므로 같은 입력은 항상 같은 청크가 됩니다.
//!
//! - `WindowChunker`: 고정 크기 + 오버랩, 문단/문장/공백 경계에 맞춤 (기본)
//! - `MarkdownChunker`: 헤더 섹션 단위, 긴 섹션은 `WindowChunker`로 재분할

use regex::Regex;

use crate::config::{ChunkStrategy, ChunkingConfig};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 최소 청크 크기 (문자 수, Markdown 섹션 병합 기준)
    pub min_characters: usize,
    /// 최대 청크 크기 (바이트 기준 근사)
    pub max_characters: usize,
    /// 오버랩 크기
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_characters: 200,
            max_characters: 1024,
            overlap_characters: 200,
        }
    }
}

/// 원문 위치를 가진 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// 시작 바이트 오프셋
    pub start: usize,
    /// 끝 바이트 오프셋 (exclusive)
    pub end: usize,
    pub text: String,
}

impl TextSpan {
    fn from_range(source: &str, start: usize, end: usize) -> Option<Self> {
        let (start, end) = trim_range(source, start, end);
        if start >= end {
            return None;
        }
        Some(Self {
            start,
            end,
            text: source[start..end].to_string(),
        })
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<TextSpan>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// WindowChunker
// ============================================================================

/// 고정 크기 창 청커
pub struct WindowChunker {
    config: ChunkConfig,
}

impl WindowChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// `[start, hard_end)` 안에서 가장 자연스러운 분할 지점
    ///
    /// 문단 > 줄바꿈 > 문장 끝 > 공백 순서이며, 창의 절반 이후만 후보입니다.
    fn find_break(&self, text: &str, start: usize, hard_end: usize) -> usize {
        let window = &text[start..hard_end];
        let min_offset = window.len() / 2;

        let candidates: [&dyn Fn(&str) -> Option<usize>; 4] = [
            &|w: &str| w.rfind("\n\n").map(|p| p + 2),
            &|w: &str| w.rfind('\n').map(|p| p + 1),
            &|w: &str| {
                ["。", ". ", "! ", "? "]
                    .iter()
                    .filter_map(|pat| w.rfind(pat).map(|p| p + pat.len()))
                    .max()
            },
            &|w: &str| w.rfind(char::is_whitespace).map(|p| p + 1),
        ];

        for find in candidates {
            if let Some(offset) = find(window) {
                if offset > min_offset {
                    return ceil_char_boundary(text, start + offset);
                }
            }
        }

        hard_end
    }

    /// `[from, to)`를 창 단위로 분할 (오프셋은 `text` 기준)
    fn chunk_range(&self, text: &str, from: usize, to: usize) -> Vec<TextSpan> {
        let max = self.config.max_characters.max(1);
        let overlap = self.config.overlap_characters.min(max.saturating_sub(1));

        let mut spans = Vec::new();
        let mut start = from;

        while start < to {
            let hard_end = floor_char_boundary(text, (start + max).min(to));
            let hard_end = if hard_end <= start {
                // 멀티바이트 문자 하나가 max보다 큰 경우
                ceil_char_boundary(text, start + 1)
            } else {
                hard_end
            };

            let end = if hard_end >= to {
                to
            } else {
                self.find_break(text, start, hard_end)
            };

            if let Some(span) = TextSpan::from_range(text, start, end) {
                spans.push(span);
            }

            if end >= to {
                break;
            }

            // 오버랩: 단어 중간에서 시작하지 않도록 앞으로 맞춤
            let mut next = ceil_char_boundary(text, end.saturating_sub(overlap));
            if next < end {
                if let Some(ws) = text[next..end].find(char::is_whitespace) {
                    next = ceil_char_boundary(text, next + ws + 1);
                }
            }
            start = if next > start { next } else { end };
        }

        spans
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<TextSpan> {
        if text.trim().is_empty() {
            return vec![];
        }
        self.chunk_range(text, 0, text.len())
    }

    fn name(&self) -> &'static str {
        "WindowChunker"
    }
}

// ============================================================================
// MarkdownChunker
// ============================================================================

/// Markdown 인식 청커
///
/// - 헤더 경계에서 섹션 분리 (코드 블록 안의 `#`은 무시)
/// - 작은 섹션은 다음 섹션과 병합
/// - 긴 섹션은 창 단위로 재분할
pub struct MarkdownChunker {
    config: ChunkConfig,
    window: WindowChunker,
    header_re: Regex,
}

impl MarkdownChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            window: WindowChunker::new(config.clone()),
            config,
            header_re: Regex::new(r"^#{1,6}\s+").expect("static header regex"),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 섹션 경계 (바이트 범위)
    fn split_sections(&self, text: &str) -> Vec<(usize, usize)> {
        let mut sections = Vec::new();
        let mut section_start = 0;
        let mut in_code_block = false;
        let mut line_start = 0;

        for line in text.split_inclusive('\n') {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }

            if !in_code_block
                && self.header_re.is_match(line)
                && !text[section_start..line_start].trim().is_empty()
            {
                sections.push((section_start, line_start));
                section_start = line_start;
            }

            line_start += line.len();
        }

        if !text[section_start..].trim().is_empty() {
            sections.push((section_start, text.len()));
        }

        sections
    }

    /// 작은 섹션 병합 (인접 범위라 오프셋이 유지됨)
    fn merge_small_sections(&self, sections: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        if self.config.min_characters == 0 {
            return sections;
        }

        let mut result: Vec<(usize, usize)> = Vec::new();

        for (start, end) in sections {
            if let Some(last) = result.last_mut() {
                let last_len = last.1 - last.0;
                if last_len < self.config.min_characters
                    && end - last.0 <= self.config.max_characters
                {
                    last.1 = end;
                    continue;
                }
            }
            result.push((start, end));
        }

        result
    }
}

impl Chunker for MarkdownChunker {
    fn chunk(&self, text: &str) -> Vec<TextSpan> {
        if text.trim().is_empty() {
            return vec![];
        }

        let sections = self.merge_small_sections(self.split_sections(text));

        sections
            .into_iter()
            .flat_map(|(start, end)| {
                if end - start <= self.config.max_characters {
                    TextSpan::from_range(text, start, end).into_iter().collect()
                } else {
                    self.window.chunk_range(text, start, end)
                }
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "MarkdownChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// UTF-8 경계 조정 (인덱스 이하로)
#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

/// UTF-8 경계 조정 (인덱스 이상으로)
#[inline]
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i < s.len() && !s.is_char_boundary(i) {
            i += 1;
        }
        i
    }
}

/// 범위 앞뒤 공백 제외
fn trim_range(s: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &s[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading == slice.len() {
        return (start, start);
    }
    (start + leading, end - trailing)
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(WindowChunker::with_defaults())
}

/// 설정에 맞는 청커 생성
pub fn chunker_from_config(config: &ChunkingConfig) -> Box<dyn Chunker> {
    let chunk_config = config.chunk_config();
    match config.strategy {
        ChunkStrategy::Window => Box::new(WindowChunker::new(chunk_config)),
        ChunkStrategy::Markdown => Box::new(MarkdownChunker::new(chunk_config)),
    }
}

// ============================================================================
// Tests
// ============================================================================
