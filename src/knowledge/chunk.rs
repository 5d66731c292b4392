//! Chunk 타입 - 검색 가능한 텍스트 단위
//!
//! 청크는 수집 시점에 한 번 생성되고 이후 변경되지 않습니다.
//! 인덱스 전체 재생성으로만 삭제됩니다.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터 (출처 정보)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 원본 문서 ID
    pub document_id: String,
    /// 출처 이름 또는 경로 (예: "manual.pdf")
    pub source: String,
    /// PDF 페이지 번호 (1부터 시작, 없을 수 있음)
    #[serde(default)]
    pub page: Option<u32>,
    /// 추가 메타데이터
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// 검색 단위 청크
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 고유 청크 ID (fusion 시 식별 키)
    pub chunk_id: String,
    /// 원본 문서 ID
    pub document_id: String,
    /// 문서 내 위치 (0-based)
    pub chunk_index: usize,
    /// 청크 텍스트
    pub text: String,
    /// 출처 메타데이터
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// 새 청크 생성 (chunk_id는 UUID v4)
    pub fn new(
        document_id: impl Into<String>,
        chunk_index: usize,
        text: impl Into<String>,
        source: impl Into<String>,
        page: Option<u32>,
    ) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            document_id,
            chunk_index,
            text,
            source,
            page,
        )
    }

    /// chunk_id를 지정하여 생성
    pub fn with_id(
        chunk_id: impl Into<String>,
        document_id: impl Into<String>,
        chunk_index: usize,
        text: impl Into<String>,
        source: impl Into<String>,
        page: Option<u32>,
    ) -> Self {
        let document_id = document_id.into();
        Self {
            chunk_id: chunk_id.into(),
            document_id: document_id.clone(),
            chunk_index,
            text: text.into(),
            metadata: ChunkMetadata {
                document_id,
                source: source.into(),
                page,
                extra: BTreeMap::new(),
            },
        }
    }

    /// 출처 이름
    pub fn source(&self) -> &str {
        &self.metadata.source
    }
}

// ============================================================================
// Scored Chunk
// ============================================================================

/// 스코어 생산자
///
/// 생산자마다 스코어 의미가 다르므로 서로 비교하면 안 됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// VectorIndex 제곱 L2 거리 (낮을수록 가까움)
    Distance,
    /// BM25 스코어 (높을수록 좋음)
    Bm25,
    /// RRF 통합 스코어 (높을수록 좋음)
    Rrf,
    /// Cross-encoder 관련도 (높을수록 좋음)
    CrossEncoder,
}

impl ScoreSource {
    /// 스코어가 높을수록 좋은지 여부
    pub fn higher_is_better(self) -> bool {
        !matches!(self, Self::Distance)
    }

    /// 출력용 짧은 라벨
    pub fn label(self) -> &'static str {
        match self {
            Self::Distance => "L2",
            Self::Bm25 => "BM25",
            Self::Rrf => "RRF",
            Self::CrossEncoder => "CE",
        }
    }
}

/// (스코어, 청크) 쌍
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub score: f32,
    pub source: ScoreSource,
    pub chunk: Chunk,
}

impl ScoredChunk {
    pub fn new(score: f32, source: ScoreSource, chunk: Chunk) -> Self {
        Self { score, source, chunk }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_metadata_mirrors_document_id() {
        let chunk = Chunk::new("doc1", 0, "hello", "manual.pdf", Some(3));
        assert_eq!(chunk.metadata.document_id, "doc1");
        assert_eq!(chunk.source(), "manual.pdf");
        assert_eq!(chunk.metadata.page, Some(3));
        assert!(!chunk.chunk_id.is_empty());
    }

    #[test]
    fn test_chunk_ids_are_unique() {
        let a = Chunk::new("doc1", 0, "a", "s", None);
        let b = Chunk::new("doc1", 1, "b", "s", None);
        assert_ne!(a.chunk_id, b.chunk_id);
    }

    #[test]
    fn test_chunk_json_roundtrip_keeps_extra() {
        let mut chunk = Chunk::with_id("c1", "doc1", 2, "text", "a.txt", None);
        chunk.metadata.extra.insert("lang".into(), "en".into());

        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_score_direction() {
        assert!(!ScoreSource::Distance.higher_is_better());
        assert!(ScoreSource::Bm25.higher_is_better());
        assert!(ScoreSource::Rrf.higher_is_better());
        assert!(ScoreSource::CrossEncoder.higher_is_better());
    }
}
