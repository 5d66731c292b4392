//! Text Chunking Module
//!
//! 문서 텍스트를 검색 단위 청크로 나눕니다.
//! - `FixedChunker`: 고정 길이 슬라이딩 윈도우 + 오버랩
//! - `SentenceChunker`: 문장 경계에서 최대 길이까지 묶기
//! - `SectionChunker`: Markdown 헤더/문단 구조 인식

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{ChunkStrategy, ChunkingConfig};
use crate::extractor::PageText;

use super::chunk::Chunk;

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+").expect("Invalid regex"));

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// Sentence Splitting
// ============================================================================

/// 문장 분리
///
/// `.`, `!`, `?` 뒤에 공백이나 텍스트 끝이 오면 문장 경계입니다.
/// 공백만 있는 조각은 버립니다.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |next| next.is_whitespace());
            if at_boundary {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

/// 연속 공백을 하나로
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// FixedChunker
// ============================================================================

/// 고정 길이 청커 (문자 단위)
///
/// 윈도우는 `max_chars - overlap`씩 이동하며, 윈도우 끝이 텍스트 끝에 닿으면 멈춥니다.
pub struct FixedChunker {
    max_chars: usize,
    overlap: usize,
}

impl FixedChunker {
    pub fn new(max_chars: usize, overlap: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            overlap: overlap.min(max_chars - 1),
        }
    }
}

impl Chunker for FixedChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let text = collapse_whitespace(text);
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return vec![];
        }

        let step = self.max_chars - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.max_chars).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }
            if end >= chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "FixedChunker"
    }
}

// ============================================================================
// SentenceChunker
// ============================================================================

/// 문장 단위 청커
///
/// 문장을 순서대로 `max_chars`까지 묶습니다.
/// 한 문장이 `max_chars`보다 길면 고정 길이로 자릅니다.
pub struct SentenceChunker {
    max_chars: usize,
}

impl SentenceChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let text = collapse_whitespace(text);
        let mut chunks = Vec::new();
        let mut current = String::new();

        for sentence in split_sentences(&text) {
            let sentence_len = sentence.chars().count();

            if sentence_len > self.max_chars {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.extend(FixedChunker::new(self.max_chars, 0).chunk(&sentence));
                continue;
            }

            let current_len = current.chars().count();
            if !current.is_empty() && current_len + 1 + sentence_len > self.max_chars {
                chunks.push(std::mem::take(&mut current));
            }

            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&sentence);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "SentenceChunker"
    }
}

// ============================================================================
// SectionChunker
// ============================================================================

/// Markdown 섹션 인식 청커
///
/// - 헤더 경계 유지
/// - 코드 블록 보존
/// - 문단 경계 존중
/// - 작은 청크는 이웃과 병합
pub struct SectionChunker {
    min_chars: usize,
    max_chars: usize,
}

impl SectionChunker {
    pub fn new(max_chars: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            min_chars: max_chars / 4,
            max_chars,
        }
    }

    /// Markdown을 섹션으로 분할
    fn split_sections(&self, text: &str) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current = String::new();
        let mut in_code_block = false;

        for line in text.lines() {
            // 코드 블록 추적
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }

            // 코드 블록 내부가 아니고 헤더를 만나면 새 섹션 시작
            if !in_code_block && HEADER_RE.is_match(line) && !current.trim().is_empty() {
                sections.push(current.trim().to_string());
                current.clear();
            }

            current.push_str(line);
            current.push('\n');
        }

        if !current.trim().is_empty() {
            sections.push(current.trim().to_string());
        }

        sections
    }

    /// 긴 섹션을 문단 경계에서 분할
    fn split_long_section(&self, section: &str) -> Vec<String> {
        if section.chars().count() <= self.max_chars {
            return vec![section.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for para in section.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }
            let para_len = para.chars().count();

            if !current.is_empty() && current.chars().count() + para_len + 2 > self.max_chars {
                chunks.push(std::mem::take(&mut current));
            }

            // 문단 자체가 최대 크기 초과 → 문장 단위로
            if para_len > self.max_chars {
                chunks.extend(SentenceChunker::new(self.max_chars).chunk(para));
                continue;
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(para);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// 작은 청크 병합
    fn merge_small_chunks(&self, chunks: Vec<String>) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();

        for chunk in chunks {
            if let Some(last) = result.last_mut() {
                let last_len = last.chars().count();
                if last_len < self.min_chars && last_len + chunk.chars().count() + 2 <= self.max_chars {
                    last.push_str("\n\n");
                    last.push_str(&chunk);
                    continue;
                }
            }
            result.push(chunk);
        }

        result
    }
}

impl Chunker for SectionChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        // 1. 섹션으로 분할
        let sections = self.split_sections(text);

        // 2. 긴 섹션 분할
        let mut chunks: Vec<String> = sections
            .into_iter()
            .flat_map(|s| self.split_long_section(&s))
            .collect();

        // 3. 빈 청크 제거
        chunks.retain(|c| !c.trim().is_empty());

        // 4. 작은 청크 병합
        self.merge_small_chunks(chunks)
    }

    fn name(&self) -> &'static str {
        "SectionChunker"
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 설정에 맞는 청커 생성
pub fn create_chunker(config: &ChunkingConfig) -> Box<dyn Chunker> {
    match config.strategy {
        ChunkStrategy::Fixed => Box::new(FixedChunker::new(config.max_chars, config.overlap)),
        ChunkStrategy::Sentence => Box::new(SentenceChunker::new(config.max_chars)),
        ChunkStrategy::Section => Box::new(SectionChunker::new(config.max_chars)),
    }
}

/// 페이지별 텍스트 → 청크
///
/// chunk_index는 문서 전체에서 0부터 연속으로 매깁니다.
/// 각 청크는 자신이 나온 페이지 번호를 가집니다.
pub fn chunk_pages(
    pages: &[PageText],
    document_id: &str,
    source: &str,
    chunker: &dyn Chunker,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for page in pages {
        for text in chunker.chunk(&page.text) {
            let index = chunks.len();
            chunks.push(Chunk::new(document_id, index, text, source, page.page));
        }
    }

    chunks
}

// ============================================================================
// Tests
// ============================================================================
