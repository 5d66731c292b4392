//! Retrieval Evaluation - precision@k / recall@k / MRR / top-1
//!
//! 검색된 청크의 출처를 문서 ID(파일 stem)로 바꾸고 순위 순서대로 중복 제거한 뒤
//! 질문마다 기대 문서 집합과 비교합니다.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::collector::document_id_for;
use crate::knowledge::ScoredChunk;
use crate::pipeline::RagPipeline;

// ============================================================================
// Types
// ============================================================================

/// 평가 질문
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub relevant_docs: Vec<String>,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
}

/// 질문 하나의 검색 평가 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalEvalResult {
    pub id: String,
    pub question: String,
    #[serde(rename = "precision@k")]
    pub precision: f64,
    #[serde(rename = "recall@k")]
    pub recall: f64,
    pub reciprocal_rank: f64,
    /// 순위 순서, 중복 제거된 문서 ID
    pub retrieved: Vec<String>,
    pub expected: Vec<String>,
}

/// 실패한 질문 (교집합 없음 또는 검색 오류)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionFailure {
    pub id: String,
    pub question: String,
    pub reason: String,
}

/// 전체 요약
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalSummary {
    pub k: usize,
    pub questions: usize,
    pub evaluated: usize,
    #[serde(rename = "mean_precision@k")]
    pub mean_precision: f64,
    #[serde(rename = "mean_recall@k")]
    pub mean_recall: f64,
    pub mrr: f64,
    pub top1_accuracy: f64,
}

/// 검색 평가 보고서
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalEvalReport {
    pub summary: RetrievalSummary,
    pub results: Vec<RetrievalEvalResult>,
    pub failures: Vec<QuestionFailure>,
}

// ============================================================================
// Question Loading
// ============================================================================

/// JSON 질문 파일 로드 (`[{id, question, relevant_docs, expected_keywords?}]`)
pub fn load_questions(path: &Path) -> Result<Vec<QuestionRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read questions file: {:?}", path))?;
    let questions: Vec<QuestionRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse questions file: {:?}", path))?;

    tracing::info!("Loaded {} questions from {:?}", questions.len(), path);
    Ok(questions)
}

// ============================================================================
// Metrics
// ============================================================================

/// 청크 출처 → 문서 ID (순위 순서, 중복 제거)
pub fn retrieved_documents(chunks: &[ScoredChunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .map(|c| document_id_for(Path::new(c.chunk.source())))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// 질문 하나 채점
pub fn score_question(question: &QuestionRecord, retrieved: Vec<String>) -> RetrievalEvalResult {
    let expected: HashSet<&str> = question.relevant_docs.iter().map(String::as_str).collect();
    let hits = retrieved
        .iter()
        .filter(|doc| expected.contains(doc.as_str()))
        .count();

    let precision = if retrieved.is_empty() {
        0.0
    } else {
        hits as f64 / retrieved.len() as f64
    };
    let recall = if expected.is_empty() {
        0.0
    } else {
        hits as f64 / expected.len() as f64
    };
    let reciprocal_rank = retrieved
        .iter()
        .position(|doc| expected.contains(doc.as_str()))
        .map_or(0.0, |rank| 1.0 / (rank + 1) as f64);

    RetrievalEvalResult {
        id: question.id.clone(),
        question: question.question.clone(),
        precision,
        recall,
        reciprocal_rank,
        retrieved,
        expected: question.relevant_docs.clone(),
    }
}

/// 결과 요약 (평가된 질문 기준 평균)
pub fn summarize(k: usize, questions: usize, results: &[RetrievalEvalResult]) -> RetrievalSummary {
    let n = results.len();
    let mean = |f: fn(&RetrievalEvalResult) -> f64| {
        if n == 0 {
            0.0
        } else {
            results.iter().map(f).sum::<f64>() / n as f64
        }
    };

    RetrievalSummary {
        k,
        questions,
        evaluated: n,
        mean_precision: mean(|r| r.precision),
        mean_recall: mean(|r| r.recall),
        mrr: mean(|r| r.reciprocal_rank),
        top1_accuracy: mean(|r| if r.reciprocal_rank == 1.0 { 1.0 } else { 0.0 }),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// 질문 세트 검색 평가
///
/// 검색 오류는 실패 목록에 기록하고 다음 질문으로 넘어갑니다.
pub async fn evaluate_retrieval(
    pipeline: &RagPipeline,
    questions: &[QuestionRecord],
    k: usize,
) -> RetrievalEvalReport {
    let mut results = Vec::with_capacity(questions.len());
    let mut failures = Vec::new();

    for question in questions {
        match pipeline.retrieve(&question.question, k).await {
            Ok(response) => {
                let result = score_question(question, retrieved_documents(&response.chunks));
                if result.reciprocal_rank == 0.0 {
                    failures.push(QuestionFailure {
                        id: question.id.clone(),
                        question: question.question.clone(),
                        reason: format!(
                            "no relevant document retrieved (got {:?}, expected {:?})",
                            result.retrieved, result.expected
                        ),
                    });
                }
                tracing::debug!(
                    "{}: precision={:.3} recall={:.3}",
                    question.id,
                    result.precision,
                    result.recall
                );
                results.push(result);
            }
            Err(e) => {
                tracing::warn!("Retrieval failed for {}: {:#}", question.id, e);
                failures.push(QuestionFailure {
                    id: question.id.clone(),
                    question: question.question.clone(),
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    RetrievalEvalReport {
        summary: summarize(k, questions.len(), &results),
        results,
        failures,
    }
}

// ============================================================================
// Tests
// ============================================================================
