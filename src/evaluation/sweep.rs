//! Experiment Sweep - 구성별 검색 평가 비교
//!
//! 구성(청킹 전략, 임베딩 모델, 검색기, 재정렬기)마다 메모리 인덱스를 새로 만들고
//! 같은 코퍼스를 수집한 뒤 같은 질문 세트로 검색 평가를 돌립니다.
//! 디스크의 인덱스와 문서 기록은 건드리지 않습니다.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::collector::CollectedFile;
use crate::config::{ChunkStrategy, RagConfig, RerankerKind, RetrieverKind};
use crate::embedding::create_embedder;
use crate::knowledge::{create_chunker, Indexer, VectorIndex};
use crate::pipeline::RagPipeline;

use super::retrieval::{evaluate_retrieval, QuestionRecord, RetrievalSummary};

/// 청킹 비교 격자 (max_chars, overlap)
const FIXED_GRID: [(usize, usize); 3] = [(500, 100), (1000, 200), (2000, 400)];

// ============================================================================
// Variants
// ============================================================================

/// 실험 구성 하나
#[derive(Debug, Clone, PartialEq)]
pub struct SweepVariant {
    pub name: String,
    pub config: RagConfig,
}

impl SweepVariant {
    /// 설정에서 이름을 만들어 생성
    pub fn new(config: RagConfig) -> Self {
        Self {
            name: variant_tag(&config),
            config,
        }
    }
}

/// 구성 이름
///
/// `fixed_{max}_{overlap}` 또는 전략 이름 뒤에 `_{retriever}_{rerank|norank}`.
pub fn variant_tag(config: &RagConfig) -> String {
    let chunking = match config.chunking.strategy {
        ChunkStrategy::Fixed => format!(
            "fixed_{}_{}",
            config.chunking.max_chars, config.chunking.overlap
        ),
        ChunkStrategy::Sentence => "sentence".to_string(),
        ChunkStrategy::Section => "section".to_string(),
    };
    let retriever = match config.retrieval.retriever {
        RetrieverKind::Dense => "dense",
        RetrieverKind::Bm25 => "bm25",
        RetrieverKind::Hybrid => "hybrid",
    };
    let rerank = match config.retrieval.reranker {
        RerankerKind::None => "norank",
        _ => "rerank",
    };

    format!("{}_{}_{}", chunking, retriever, rerank)
}

/// 청킹 비교 구성
///
/// 고정 길이 3종과 문장, 섹션 전략. 모두 벡터 검색만, 재정렬 없음.
pub fn chunking_grid(base: &RagConfig) -> Vec<SweepVariant> {
    let mut configs = Vec::new();

    for (max_chars, overlap) in FIXED_GRID {
        let mut config = dense_only(base);
        config.chunking.strategy = ChunkStrategy::Fixed;
        config.chunking.max_chars = max_chars;
        config.chunking.overlap = overlap;
        configs.push(config);
    }

    for strategy in [ChunkStrategy::Sentence, ChunkStrategy::Section] {
        let mut config = dense_only(base);
        config.chunking.strategy = strategy;
        configs.push(config);
    }

    configs.into_iter().map(SweepVariant::new).collect()
}

/// 임베딩 모델 비교 구성
///
/// 모델 표기는 `name` 또는 `name=dimension`. 차원을 생략하면 기본 설정 값.
pub fn embedding_variants(base: &RagConfig, models: &[String]) -> Result<Vec<SweepVariant>> {
    let mut variants = Vec::with_capacity(models.len());

    for spec in models {
        let (model, dimension) = match spec.rsplit_once('=') {
            Some((model, dim)) => {
                let dim: usize = dim
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid dimension in model spec: {}", spec))?;
                (model.trim(), dim)
            }
            None => (spec.trim(), base.embedding.dimension),
        };
        if model.is_empty() {
            bail!("Empty model name in spec: {:?}", spec);
        }

        let mut config = dense_only(base);
        config.embedding.model = model.to_string();
        config.embedding.dimension = dimension;
        variants.push(SweepVariant {
            name: model.to_string(),
            config,
        });
    }

    Ok(variants)
}

fn dense_only(base: &RagConfig) -> RagConfig {
    let mut config = base.clone();
    config.retrieval.retriever = RetrieverKind::Dense;
    config.retrieval.reranker = RerankerKind::None;
    config.generation.enabled = false;
    config
}

// ============================================================================
// Report
// ============================================================================

/// 구성 하나의 결과
#[derive(Debug, Clone, Serialize)]
pub struct SweepRow {
    pub name: String,
    pub embedding_model: String,
    pub retriever: RetrieverKind,
    pub reranker: RerankerKind,
    pub num_documents: usize,
    pub num_chunks: usize,
    pub ingest_failures: usize,
    pub failed_questions: usize,
    pub summary: RetrievalSummary,
}

/// 실행하지 못한 구성
#[derive(Debug, Clone, Serialize)]
pub struct VariantFailure {
    pub name: String,
    pub reason: String,
}

/// 전체 비교 결과
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub k: usize,
    pub rows: Vec<SweepRow>,
    pub failures: Vec<VariantFailure>,
}

impl SweepReport {
    /// MRR이 가장 높은 구성 (동점이면 먼저 실행된 구성)
    pub fn best(&self) -> Option<&SweepRow> {
        self.rows.iter().fold(None, |best: Option<&SweepRow>, row| match best {
            Some(b) if b.summary.mrr >= row.summary.mrr => Some(b),
            _ => Some(row),
        })
    }
}

// ============================================================================
// Runner
// ============================================================================

/// 구성 하나 실행
pub async fn run_variant(
    variant: &SweepVariant,
    files: &[CollectedFile],
    questions: &[QuestionRecord],
    k: usize,
) -> Result<SweepRow> {
    let config = &variant.config;
    config.validate()?;

    let embedder = create_embedder(&config.embedding)?;
    let index = Arc::new(VectorIndex::new(embedder.dimension())?);
    let indexer = Indexer::new(embedder, index.clone(), create_chunker(&config.chunking));

    let ingest = indexer.ingest_files(files).await;
    if ingest.indexed_documents() == 0 {
        bail!(
            "No documents indexed for {} ({} failures)",
            variant.name,
            ingest.failures.len()
        );
    }

    let pipeline = RagPipeline::from_config(config, index.clone())
        .with_context(|| format!("Failed to build pipeline for {}", variant.name))?;
    let report = evaluate_retrieval(&pipeline, questions, k).await;

    tracing::info!(
        "Variant {}: chunks={}, mrr={:.4}",
        variant.name,
        index.size()?,
        report.summary.mrr
    );

    Ok(SweepRow {
        name: variant.name.clone(),
        embedding_model: config.embedding.model.clone(),
        retriever: config.retrieval.retriever,
        reranker: config.retrieval.reranker,
        num_documents: ingest.indexed_documents(),
        num_chunks: index.size()?,
        ingest_failures: ingest.failures.len(),
        failed_questions: report.failures.len(),
        summary: report.summary,
    })
}

/// 구성 목록 실행 (실패한 구성은 모아서 보고)
pub async fn run_sweep(
    variants: &[SweepVariant],
    files: &[CollectedFile],
    questions: &[QuestionRecord],
    k: usize,
) -> SweepReport {
    let mut report = SweepReport {
        k,
        rows: Vec::with_capacity(variants.len()),
        failures: Vec::new(),
    };

    for (i, variant) in variants.iter().enumerate() {
        tracing::info!("Running variant {}/{}: {}", i + 1, variants.len(), variant.name);
        match run_variant(variant, files, questions, k).await {
            Ok(row) => report.rows.push(row),
            Err(e) => {
                tracing::warn!("Variant {} failed: {:#}", variant.name, e);
                report.failures.push(VariantFailure {
                    name: variant.name.clone(),
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    report
}

// ============================================================================
// Tests
// ============================================================================
