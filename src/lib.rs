//! ragcheck - 로컬 RAG 검색 + 근거성 평가
//!
//! 정확한 L2 벡터 검색, BM25 어휘 검색, RRF 통합, 재정렬로 구성된
//! 검색 파이프라인과, 생성된 답변이 검색된 청크에 근거하는지 측정하는
//! 평가 도구입니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod extractor;
pub mod knowledge;
pub mod llm;
pub mod pipeline;

// Re-exports
pub use config::{get_data_dir, RagConfig};
pub use embedding::{create_embedder, EmbeddingProvider, HashingEmbedding, OllamaEmbedding};
pub use error::{ErrorKind, RagError};
pub use evaluation::{
    EvaluationRecord, GroundingEvaluator, GroundingReport, GroundingSummary, QuestionRecord,
};
pub use knowledge::{
    Bm25Index, Chunk, ChunkStore, DocumentRegistry, Reranker, Retriever, RrfFusion, ScoreSource,
    ScoredChunk, VectorIndex,
};
pub use llm::{OllamaGenerator, PromptBuilder, TextGenerator};
pub use pipeline::{PipelineStage, RagPipeline, RagResponse};
