//! RAG 파이프라인 - 검색 → [통합] → [재순위] → [생성]
//!
//! 단계: Retrieving → Fusing(하이브리드일 때) → Reranking(재순위기가 있을 때) → Done
//! 생성기가 있고 근거 청크가 있으면 Generating 단계가 Done 앞에 추가됩니다.
//!
//! 재순위기가 있으면 k 대신 max(4k, 10)개 후보를 가져와 재순위 후 k개로 자릅니다.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::{RagConfig, RerankerKind};
use crate::embedding::create_embedder;
use crate::error::RagError;
use crate::knowledge::{
    build_retriever, HttpCrossEncoder, Reranker, Retriever, RrfFusion, ScoredChunk,
    TermOverlapScorer, VectorIndex,
};
use crate::llm::{OllamaGenerator, PromptBuilder, TextGenerator};

/// 기본 검색 개수
pub const DEFAULT_TOP_K: usize = 5;

/// 재순위 시 최소 후보 수
const MIN_RERANK_CANDIDATES: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// 파이프라인 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Retrieving,
    Fusing,
    Reranking,
    Generating,
    Done,
}

/// 청크 출처
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub source: String,
    pub page: Option<u32>,
}

/// 파이프라인 응답
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    /// 생성된 답변 (생성기가 없거나 근거가 없으면 None)
    pub answer: Option<String>,
    /// 최종 청크 (순서 유지)
    pub chunks: Vec<ScoredChunk>,
    /// 청크별 출처
    pub sources: Vec<SourceRef>,
    /// 중복 없는 출처 이름 (첫 등장 순서)
    pub distinct_sources: Vec<String>,
    /// 거친 단계
    pub stages: Vec<PipelineStage>,
}

/// 재순위기 유무에 따른 후보 수
pub fn candidate_count(k: usize, has_reranker: bool) -> usize {
    if has_reranker {
        (4 * k).max(MIN_RERANK_CANDIDATES)
    } else {
        k
    }
}

/// 첫 등장 순서대로 중복 없는 출처
pub fn distinct_sources(chunks: &[ScoredChunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .map(|c| c.chunk.source())
        .filter(|s| seen.insert(*s))
        .map(str::to_string)
        .collect()
}

// ============================================================================
// RagPipeline
// ============================================================================

pub struct RagPipeline {
    retriever: Arc<dyn Retriever>,
    reranker: Option<Reranker>,
    generator: Option<Arc<dyn TextGenerator>>,
    prompt_builder: PromptBuilder,
}

impl RagPipeline {
    /// 검색 전용 파이프라인
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self {
            retriever,
            reranker: None,
            generator: None,
            prompt_builder: PromptBuilder::default(),
        }
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_prompt_builder(mut self, prompt_builder: PromptBuilder) -> Self {
        self.prompt_builder = prompt_builder;
        self
    }

    /// 설정으로 조립
    ///
    /// 모든 구성요소를 여기서 한 번 만들고 파이프라인에 넘깁니다.
    pub fn from_config(config: &RagConfig, index: Arc<VectorIndex>) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        if embedder.dimension() != index.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimension(),
            }
            .into());
        }

        let fusion = RrfFusion::new(config.retrieval.rrf_k)?;
        let retriever = build_retriever(config.retrieval.retriever, embedder, index, fusion)?;
        let mut pipeline = Self::new(retriever)
            .with_prompt_builder(PromptBuilder::new(config.generation.max_context_chars));

        match config.retrieval.reranker {
            RerankerKind::None => {}
            RerankerKind::TermOverlap => {
                pipeline = pipeline.with_reranker(Reranker::new(Arc::new(TermOverlapScorer)));
            }
            RerankerKind::CrossEncoder => {
                let scorer = HttpCrossEncoder::new(&config.retrieval.reranker_url)?;
                pipeline = pipeline.with_reranker(Reranker::new(Arc::new(scorer)));
            }
        }

        if config.generation.enabled {
            let generator = OllamaGenerator::from_config(&config.generation)?;
            pipeline = pipeline.with_generator(Arc::new(generator));
        }

        Ok(pipeline)
    }

    pub fn retriever_name(&self) -> &'static str {
        self.retriever.name()
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// 검색만 수행 (답변 생성 없음)
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RagResponse> {
        if k == 0 {
            return Err(RagError::InvalidConfig("k must be at least 1".to_string()).into());
        }

        let mut stages = vec![PipelineStage::Retrieving];
        let candidates = candidate_count(k, self.reranker.is_some());

        let mut chunks = self
            .retriever
            .retrieve(query, candidates)
            .await
            .with_context(|| format!("{} retrieval failed", self.retriever.name()))?;

        if self.retriever.fuses() {
            stages.push(PipelineStage::Fusing);
        }

        tracing::debug!(
            "Retrieved {} candidates (requested {}) with {}",
            chunks.len(),
            candidates,
            self.retriever.name()
        );

        if let Some(reranker) = &self.reranker {
            stages.push(PipelineStage::Reranking);
            chunks = reranker.rerank(query, chunks, k).await?;
        }

        chunks.truncate(k);
        stages.push(PipelineStage::Done);

        Ok(RagResponse {
            answer: None,
            sources: chunks
                .iter()
                .map(|c| SourceRef {
                    chunk_id: c.chunk.chunk_id.clone(),
                    source: c.chunk.source().to_string(),
                    page: c.chunk.metadata.page,
                })
                .collect(),
            distinct_sources: distinct_sources(&chunks),
            chunks,
            stages,
        })
    }

    /// 검색 + 답변 생성
    ///
    /// 근거 청크가 없으면 생성기를 호출하지 않고 답변을 비워 둡니다.
    pub async fn answer_query(&self, query: &str, k: usize) -> Result<RagResponse> {
        let mut response = self.retrieve(query, k).await?;

        let generator = match &self.generator {
            Some(generator) => generator,
            None => return Ok(response),
        };

        if response.chunks.is_empty() {
            tracing::warn!("No evidence retrieved for query, skipping generation");
            return Ok(response);
        }

        let chunks: Vec<_> = response.chunks.iter().map(|c| c.chunk.clone()).collect();
        let context = self.prompt_builder.build_context(&chunks);
        let prompt = self.prompt_builder.build_prompt(query, &context);

        let answer = generator
            .complete(&prompt)
            .await
            .with_context(|| format!("Generation with {} failed", generator.name()))?;

        response.stages.pop();
        response.stages.push(PipelineStage::Generating);
        response.stages.push(PipelineStage::Done);
        response.answer = Some(answer);

        Ok(response)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Bm25Index, Chunk, RelevanceScorer, ScoreSource};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn corpus() -> Vec<Chunk> {
        (0..12)
            .map(|i| {
                let source = if i % 2 == 0 { "aspirin.txt" } else { "insulin.txt" };
                Chunk::with_id(
                    format!("c{:02}", i),
                    source.trim_end_matches(".txt"),
                    i,
                    format!("aspirin pain note {} {}", i, "filler ".repeat(i)),
                    source,
                    Some(1),
                )
            })
            .collect()
    }

    /// 요청된 k를 기록하는 검색기
    struct RecordingRetriever {
        inner: Bm25Index,
        requested: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Retriever for RecordingRetriever {
        async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
            self.requested.lock().unwrap().push(k);
            Ok(self.inner.retrieve(query, k))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    struct ReverseScorer;

    #[async_trait]
    impl RelevanceScorer for ReverseScorer {
        async fn score(&self, _query: &str, texts: &[&str]) -> Result<Vec<f32>> {
            Ok((0..texts.len()).map(|i| i as f32).collect())
        }

        fn name(&self) -> &str {
            "reverse"
        }
    }

    struct EchoGenerator {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn complete(&self, prompt: &str) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(format!("echo {}", prompt.len()))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn recording() -> Arc<RecordingRetriever> {
        Arc::new(RecordingRetriever {
            inner: Bm25Index::new(corpus()),
            requested: Mutex::new(vec![]),
        })
    }

    #[test]
    fn test_candidate_count() {
        assert_eq!(candidate_count(5, false), 5);
        assert_eq!(candidate_count(1, true), 10);
        assert_eq!(candidate_count(2, true), 10);
        assert_eq!(candidate_count(3, true), 12);
        assert_eq!(candidate_count(5, true), 20);
    }

    #[tokio::test]
    async fn test_retrieve_without_reranker() {
        let retriever = recording();
        let pipeline = RagPipeline::new(retriever.clone());

        let response = pipeline.retrieve("aspirin", 3).await.unwrap();
        assert_eq!(response.chunks.len(), 3);
        assert_eq!(*retriever.requested.lock().unwrap(), vec![3]);
        assert_eq!(
            response.stages,
            vec![PipelineStage::Retrieving, PipelineStage::Done]
        );
        assert!(response.answer.is_none());
        assert_eq!(response.distinct_sources, vec!["aspirin.txt", "insulin.txt"]);
        assert_eq!(response.sources.len(), 3);
    }

    #[tokio::test]
    async fn test_reranker_over_retrieves_then_truncates() {
        let retriever = recording();
        let pipeline = RagPipeline::new(retriever.clone())
            .with_reranker(Reranker::new(Arc::new(ReverseScorer)));

        let response = pipeline.retrieve("aspirin", 2).await.unwrap();

        assert_eq!(*retriever.requested.lock().unwrap(), vec![10]);
        assert_eq!(response.chunks.len(), 2);
        assert!(response.chunks.iter().all(|c| c.source == ScoreSource::CrossEncoder));
        // ReverseScorer는 마지막 후보에 가장 높은 점수를 줌
        assert_eq!(response.chunks[0].score, 9.0);
        assert_eq!(
            response.stages,
            vec![PipelineStage::Retrieving, PipelineStage::Reranking, PipelineStage::Done]
        );
    }

    #[tokio::test]
    async fn test_zero_k_is_configuration_error() {
        let pipeline = RagPipeline::new(recording());
        let err = pipeline.retrieve("aspirin", 0).await.unwrap_err();
        let rag_err = err.downcast_ref::<RagError>().unwrap();
        assert_eq!(rag_err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_error() {
        let pipeline = RagPipeline::new(recording());
        let response = pipeline.retrieve("quantum", 3).await.unwrap();
        assert!(response.chunks.is_empty());
        assert!(response.distinct_sources.is_empty());
        assert_eq!(response.stages.last(), Some(&PipelineStage::Done));
    }

    #[tokio::test]
    async fn test_answer_query_generates_with_evidence() {
        let generator = Arc::new(EchoGenerator { calls: Mutex::new(0) });
        let pipeline = RagPipeline::new(recording()).with_generator(generator.clone());

        let response = pipeline.answer_query("aspirin", 2).await.unwrap();
        assert!(response.answer.unwrap().starts_with("echo "));
        assert_eq!(*generator.calls.lock().unwrap(), 1);
        assert_eq!(
            response.stages,
            vec![PipelineStage::Retrieving, PipelineStage::Generating, PipelineStage::Done]
        );
    }

    #[tokio::test]
    async fn test_answer_query_skips_generator_without_evidence() {
        let generator = Arc::new(EchoGenerator { calls: Mutex::new(0) });
        let pipeline = RagPipeline::new(recording()).with_generator(generator.clone());

        let response = pipeline.answer_query("quantum", 2).await.unwrap();
        assert!(response.answer.is_none());
        assert_eq!(*generator.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_from_config_checks_dimension() {
        let mut config = RagConfig::default();
        config.embedding.provider = crate::config::EmbeddingProviderKind::Hashing;
        config.embedding.dimension = 8;
        config.generation.enabled = false;

        let index = Arc::new(VectorIndex::new(16).unwrap());
        assert!(RagPipeline::from_config(&config, index).is_err());

        let index = Arc::new(VectorIndex::new(8).unwrap());
        config.retrieval.reranker = RerankerKind::TermOverlap;
        let pipeline = RagPipeline::from_config(&config, index).unwrap();
        assert_eq!(pipeline.retriever_name(), "hybrid");
        assert!(pipeline.has_reranker());
        assert!(!pipeline.has_generator());
    }
}
