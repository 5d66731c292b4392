//! 평가 모듈
//!
//! - grounding: 답변이 검색된 청크에 근거하는지 (환각률)
//! - retrieval: precision@k / recall@k / MRR
//! - rag: 질문 세트 전체를 파이프라인에 돌려 레코드와 요약 생성
//! - sweep: 청킹 / 임베딩 구성별 검색 평가 비교

pub mod grounding;
pub mod rag;
pub mod retrieval;
pub mod sweep;

use serde::{Deserialize, Serialize};

use crate::knowledge::Chunk;

pub use grounding::{
    normalize_tokens, GroundingEvaluator, GroundingReport, GroundingSummary, SentenceScore,
    DEFAULT_GROUNDING_THRESHOLD,
};
pub use rag::{collect_records, evaluate_rag, RagEvalReport, RagEvalSummary};
pub use retrieval::{
    evaluate_retrieval, load_questions, QuestionFailure, QuestionRecord, RetrievalEvalReport,
    RetrievalEvalResult, RetrievalSummary,
};
pub use sweep::{
    chunking_grid, embedding_variants, run_sweep, run_variant, variant_tag, SweepReport,
    SweepRow, SweepVariant, VariantFailure,
};

/// 질문 하나의 평가 레코드
///
/// `answer`가 None이면 검색 전용 평가입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub question_id: String,
    pub question: String,
    pub answer: Option<String>,
    pub retrieved_chunks: Vec<Chunk>,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
}
