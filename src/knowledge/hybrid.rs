//! 검색기 - Dense / BM25 / Hybrid
//!
//! 하이브리드 검색은 벡터 검색(L2)과 키워드 검색(BM25)을 동시에 실행한 뒤
//! RRF 알고리즘으로 통합합니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::RetrieverKind;
use crate::embedding::EmbeddingProvider;

use super::chunk::ScoredChunk;
use super::fusion::RrfFusion;
use super::lexical::Bm25Index;
use super::vector::VectorIndex;

// ============================================================================
// Retriever Trait
// ============================================================================

/// 검색기 트레이트
///
/// 결과는 검색기 고유의 순서(거리 오름차순, 스코어 내림차순)로 정렬되어 있습니다.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// 상위 k개 검색
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>>;

    /// 검색기 이름
    fn name(&self) -> &'static str;

    /// RRF 통합 단계를 거치는지 여부
    fn fuses(&self) -> bool {
        false
    }
}

// ============================================================================
// Dense
// ============================================================================

/// 벡터 검색기 (쿼리 임베딩 → L2 검색)
pub struct DenseRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
}

impl DenseRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<VectorIndex>) -> Self {
        Self { embedder, index }
    }
}

#[async_trait]
impl Retriever for DenseRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;

        Ok(self.index.search(&query_embedding, k)?)
    }

    fn name(&self) -> &'static str {
        "dense"
    }
}

// ============================================================================
// BM25
// ============================================================================

#[async_trait]
impl Retriever for Bm25Index {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        Ok(Bm25Index::retrieve(self, query, k))
    }

    fn name(&self) -> &'static str {
        "bm25"
    }
}

// ============================================================================
// Hybrid
// ============================================================================

/// 하이브리드 검색기
///
/// 벡터 + BM25 결과를 각각 k개씩 가져와 RRF로 통합합니다.
pub struct HybridRetriever {
    dense: DenseRetriever,
    lexical: Arc<Bm25Index>,
    fusion: RrfFusion,
}

impl HybridRetriever {
    pub fn new(dense: DenseRetriever, lexical: Arc<Bm25Index>, fusion: RrfFusion) -> Self {
        Self {
            dense,
            lexical,
            fusion,
        }
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let lexical = async { Ok::<_, anyhow::Error>(Bm25Index::retrieve(&self.lexical, query, k)) };
        let (dense_results, lexical_results) = tokio::try_join!(self.dense.retrieve(query, k), lexical)?;

        tracing::debug!(
            "Hybrid candidates: dense={}, bm25={}",
            dense_results.len(),
            lexical_results.len()
        );

        Ok(self.fusion.fuse(&[dense_results, lexical_results], k))
    }

    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn fuses(&self) -> bool {
        true
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 검색기 생성
///
/// BM25 인덱스는 벡터 인덱스와 같은 코퍼스(청크 스냅샷)로 만듭니다.
pub fn build_retriever(
    kind: RetrieverKind,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    fusion: RrfFusion,
) -> Result<Arc<dyn Retriever>> {
    let retriever: Arc<dyn Retriever> = match kind {
        RetrieverKind::Dense => Arc::new(DenseRetriever::new(embedder, index)),
        RetrieverKind::Bm25 => Arc::new(Bm25Index::new(index.chunks()?)),
        RetrieverKind::Hybrid => {
            let lexical = Arc::new(Bm25Index::new(index.chunks()?));
            Arc::new(HybridRetriever::new(
                DenseRetriever::new(embedder, index),
                lexical,
                fusion,
            ))
        }
    };

    Ok(retriever)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedding;
    use crate::knowledge::{Chunk, ScoreSource};

    fn corpus() -> Vec<Chunk> {
        vec![
            Chunk::with_id("aspirin", "aspirin", 0, "Aspirin relieves pain and fever.", "aspirin.txt", None),
            Chunk::with_id("insulin", "insulin", 0, "Insulin regulates blood sugar.", "insulin.txt", None),
            Chunk::with_id("statin", "statin", 0, "Statins lower cholesterol.", "statin.txt", None),
        ]
    }

    async fn indexed(embedder: &HashingEmbedding) -> Arc<VectorIndex> {
        let chunks = corpus();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await.unwrap();

        let index = VectorIndex::new(embedder.dimension()).unwrap();
        index.add(&vectors, &chunks).unwrap();
        Arc::new(index)
    }

    #[tokio::test]
    async fn test_dense_retriever() {
        let embedder = HashingEmbedding::new(128).unwrap();
        let index = indexed(&embedder).await;
        let retriever = DenseRetriever::new(Arc::new(embedder), index);

        let results = retriever.retrieve("insulin blood sugar", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_id, "insulin");
        assert_eq!(results[0].source, ScoreSource::Distance);
        assert!(!retriever.fuses());
    }

    #[tokio::test]
    async fn test_bm25_retriever_trait() {
        let index = Bm25Index::new(corpus());
        let retriever: &dyn Retriever = &index;
        let results = retriever.retrieve("cholesterol", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "statin");
        assert_eq!(retriever.name(), "bm25");
    }

    #[tokio::test]
    async fn test_hybrid_retriever_fuses() {
        let embedder = HashingEmbedding::new(128).unwrap();
        let index = indexed(&embedder).await;
        let retriever = build_retriever(
            RetrieverKind::Hybrid,
            Arc::new(embedder),
            index,
            RrfFusion::default(),
        )
        .unwrap();

        let results = retriever.retrieve("aspirin pain", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_id, "aspirin");
        assert!(results.iter().all(|r| r.source == ScoreSource::Rrf));
        assert!(retriever.fuses());
        assert_eq!(retriever.name(), "hybrid");
    }

    #[tokio::test]
    async fn test_hybrid_zero_bm25_chunks_get_dense_weight_only() {
        let embedder = HashingEmbedding::new(128).unwrap();
        let index = indexed(&embedder).await;
        let retriever = build_retriever(
            RetrieverKind::Hybrid,
            Arc::new(embedder),
            index,
            RrfFusion::default(),
        )
        .unwrap();

        // BM25는 statin만 반환
        let results = retriever.retrieve("cholesterol", 3).await.unwrap();
        assert_eq!(results.len(), 3);

        let single_list_max = (1.0 / 61.0) as f32;
        for result in &results {
            if result.chunk.chunk_id == "statin" {
                assert!(result.score > single_list_max);
            } else {
                assert!(result.score <= single_list_max + 1e-6);
            }
        }
    }

    #[tokio::test]
    async fn test_build_retriever_kinds() {
        let embedder = HashingEmbedding::new(64).unwrap();
        let index = indexed(&embedder).await;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(embedder);

        for (kind, name) in [
            (RetrieverKind::Dense, "dense"),
            (RetrieverKind::Bm25, "bm25"),
            (RetrieverKind::Hybrid, "hybrid"),
        ] {
            let retriever =
                build_retriever(kind, embedder.clone(), index.clone(), RrfFusion::default()).unwrap();
            assert_eq!(retriever.name(), name);
        }
    }
}
