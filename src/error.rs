//! 에러 타입 - 검색 코어 에러 분류
//!
//! 인덱스/평가기 연산은 `RagError`를 반환합니다.
//! 임베딩, 생성, CLI 계층은 기존과 같이 `anyhow::Result`를 사용하며
//! `RagError`는 `?`로 자연스럽게 변환됩니다.

use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Error Kind
// ============================================================================

/// 에러 분류
///
/// - Configuration: 차원 불일치, 배치 길이 불일치 등 (상태 변경 전에 거부)
/// - NotFound: 인덱스/메타데이터 파일 없음 (부분 로드 없음)
/// - Integrity: 근거 없는 답변 채점, 짝이 맞지 않는 인덱스 파일
/// - Storage: I/O, 직렬화, 락 에러
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    Integrity,
    Storage,
}

// ============================================================================
// RagError
// ============================================================================

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Batch length mismatch: {vectors} vectors for {chunks} chunks")]
    BatchLengthMismatch { vectors: usize, chunks: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Index file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Index pair mismatch: {0}")]
    PairMismatch(String),

    #[error("Corrupt index file: {0}")]
    CorruptIndex(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// 에러 분류 반환
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DimensionMismatch { .. } | Self::BatchLengthMismatch { .. } | Self::InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PairMismatch(_) | Self::CorruptIndex(_) | Self::Integrity(_) => ErrorKind::Integrity,
            Self::Lock(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
