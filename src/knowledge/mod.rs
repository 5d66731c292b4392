//! Knowledge 모듈 - 검색 코어
//!
//! - VectorIndex: 정확한 squared-L2 최근접 검색 + 파일 쌍 저장
//! - Bm25Index: 어휘 검색 (Okapi BM25)
//! - RrfFusion: 순위 목록 통합 (Reciprocal Rank Fusion)
//! - Reranker: 후보 재정렬
//! - Chunker / Indexer: 문서 분할과 수집
//! - DocumentRegistry: SQLite 문서 출처 기록

mod chunk;
mod chunk_store;
mod chunker;
mod fusion;
mod hybrid;
mod ingest;
mod lexical;
mod rerank;
mod store;
mod vector;

// Re-exports
pub use chunk::{Chunk, ChunkMetadata, ScoreSource, ScoredChunk};
pub use chunk_store::{ChunkStore, IndexedEntry};
pub use chunker::{
    chunk_pages, create_chunker, split_sentences, Chunker, FixedChunker, SectionChunker,
    SentenceChunker,
};
pub use fusion::{RrfFusion, DEFAULT_RRF_K};
pub use hybrid::{build_retriever, DenseRetriever, HybridRetriever, Retriever};
pub use ingest::{reconcile_registry, Indexer, IngestReport, IngestSummary, ReconcileReport};
pub use lexical::{tokenize, Bm25Index, Bm25Params};
pub use rerank::{HttpCrossEncoder, RelevanceScorer, Reranker, TermOverlapScorer};
pub use store::{DocumentRecord, DocumentRegistry, RegistryStats};
pub use vector::{squared_l2, VectorIndex};
