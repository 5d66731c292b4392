//! RAG Evaluation - 질문 세트 전체를 답변 생성까지 실행
//!
//! 질문마다 `answer_query`를 돌려 EvaluationRecord를 만들고,
//! 키워드 커버리지 / 인용률 / 컨텍스트 겹침 / 근거율을 요약합니다.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::pipeline::RagPipeline;

use super::grounding::{GroundingEvaluator, GroundingSummary};
use super::retrieval::{QuestionFailure, QuestionRecord};
use super::EvaluationRecord;

/// `[1]`, `[SOURCE: aspirin.txt]` 같은 인용 표시
static CITATION_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]+\]").expect("Invalid regex"));

// ============================================================================
// Types
// ============================================================================

/// RAG 평가 요약
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RagEvalSummary {
    pub k: usize,
    pub questions: usize,
    /// 답변이 생성된 질문 수
    pub answered: usize,
    /// 기대 키워드 중 답변에 나온 비율의 평균
    pub keyword_coverage: Option<f64>,
    /// 인용 표시나 출처 이름을 포함한 답변 비율
    pub citation_rate: Option<f64>,
    /// 답변 단위 컨텍스트 겹침 평균
    pub context_overlap: Option<f64>,
    pub grounding: GroundingSummary,
}

/// RAG 평가 보고서
#[derive(Debug, Clone, Serialize)]
pub struct RagEvalReport {
    pub summary: RagEvalSummary,
    pub records: Vec<EvaluationRecord>,
    pub failures: Vec<QuestionFailure>,
}

// ============================================================================
// Record Collection
// ============================================================================

/// 질문마다 답변 생성 후 레코드 수집 (실패는 모아서 반환)
pub async fn collect_records(
    pipeline: &RagPipeline,
    questions: &[QuestionRecord],
    k: usize,
) -> (Vec<EvaluationRecord>, Vec<QuestionFailure>) {
    let mut records = Vec::with_capacity(questions.len());
    let mut failures = Vec::new();

    for (i, question) in questions.iter().enumerate() {
        tracing::debug!("Answering {}/{}: {}", i + 1, questions.len(), question.id);

        match pipeline.answer_query(&question.question, k).await {
            Ok(response) => records.push(EvaluationRecord {
                question_id: question.id.clone(),
                question: question.question.clone(),
                answer: response.answer,
                retrieved_chunks: response.chunks.into_iter().map(|c| c.chunk).collect(),
                expected_keywords: question.expected_keywords.clone(),
            }),
            Err(e) => {
                tracing::warn!("Answering failed for {}: {:#}", question.id, e);
                failures.push(QuestionFailure {
                    id: question.id.clone(),
                    question: question.question.clone(),
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    (records, failures)
}

// ============================================================================
// Metrics
// ============================================================================

fn answered(records: &[EvaluationRecord]) -> impl Iterator<Item = (&EvaluationRecord, &str)> {
    records.iter().filter_map(|r| {
        r.answer
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .map(|a| (r, a))
    })
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// 키워드 커버리지 (대소문자 무시)
///
/// 답변과 기대 키워드가 모두 있는 레코드만 평균합니다.
pub fn keyword_coverage(records: &[EvaluationRecord]) -> Option<f64> {
    mean(
        answered(records)
            .filter(|(r, _)| !r.expected_keywords.is_empty())
            .map(|(r, answer)| {
                let answer = answer.to_lowercase();
                let found = r
                    .expected_keywords
                    .iter()
                    .filter(|kw| answer.contains(&kw.to_lowercase()))
                    .count();
                found as f64 / r.expected_keywords.len() as f64
            }),
    )
}

/// 답변이 인용 표시나 검색된 출처 이름을 포함하는지
pub fn has_citation(answer: &str, record: &EvaluationRecord) -> bool {
    if CITATION_MARKER_RE.is_match(answer) {
        return true;
    }
    let lowered = answer.to_lowercase();
    record
        .retrieved_chunks
        .iter()
        .any(|c| lowered.contains(&c.source().to_lowercase()))
}

/// 인용 포함 답변 비율
pub fn citation_present_rate(records: &[EvaluationRecord]) -> Option<f64> {
    mean(answered(records).map(|(r, answer)| if has_citation(answer, r) { 1.0 } else { 0.0 }))
}

/// 레코드 요약
pub fn summarize(
    k: usize,
    questions: usize,
    records: &[EvaluationRecord],
    evaluator: &GroundingEvaluator,
) -> RagEvalSummary {
    let grounding = evaluator.summarize(records);

    RagEvalSummary {
        k,
        questions,
        answered: answered(records).count(),
        keyword_coverage: keyword_coverage(records),
        citation_rate: citation_present_rate(records),
        context_overlap: grounding.mean_answer_overlap,
        grounding,
    }
}

/// 질문 세트 RAG 평가
pub async fn evaluate_rag(
    pipeline: &RagPipeline,
    questions: &[QuestionRecord],
    k: usize,
    evaluator: &GroundingEvaluator,
) -> RagEvalReport {
    let (records, failures) = collect_records(pipeline, questions, k).await;
    let summary = summarize(k, questions.len(), &records, evaluator);

    tracing::info!(
        "RAG evaluation: {} questions, {} answered, {} failures",
        summary.questions,
        summary.answered,
        failures.len()
    );

    RagEvalReport {
        summary,
        records,
        failures,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Bm25Index, Chunk};
    use crate::llm::TextGenerator;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// 고정 답변 생성기
    struct FixedGenerator(&'static str);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn record(answer: Option<&str>, keywords: &[&str]) -> EvaluationRecord {
        EvaluationRecord {
            question_id: "q".to_string(),
            question: "q".to_string(),
            answer: answer.map(str::to_string),
            retrieved_chunks: vec![Chunk::new("aspirin", 0, "Aspirin treats pain.", "aspirin.txt", None)],
            expected_keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn question(id: &str, text: &str) -> QuestionRecord {
        QuestionRecord {
            id: id.to_string(),
            question: text.to_string(),
            relevant_docs: vec![],
            expected_keywords: vec!["pain".to_string(), "fever".to_string()],
        }
    }

    #[test]
    fn test_keyword_coverage() {
        let records = vec![
            record(Some("Aspirin treats PAIN."), &["pain", "fever"]),
            record(Some("It treats pain and fever."), &["pain", "fever"]),
            record(None, &["pain"]),
            record(Some("No keywords expected."), &[]),
        ];
        assert_eq!(keyword_coverage(&records), Some(0.75));
        assert_eq!(keyword_coverage(&[record(None, &["pain"])]), None);
    }

    #[test]
    fn test_citation_rate() {
        let records = vec![
            record(Some("Aspirin treats pain [1]."), &[]),
            record(Some("See Aspirin.txt for details."), &[]),
            record(Some("Aspirin treats pain."), &[]),
            record(None, &[]),
        ];
        let rate = citation_present_rate(&records).unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_evaluate_rag_end_to_end() {
        let index = Bm25Index::new(vec![Chunk::new(
            "aspirin",
            0,
            "Aspirin relieves pain and fever.",
            "aspirin.txt",
            None,
        )]);
        let pipeline = RagPipeline::new(Arc::new(index))
            .with_generator(Arc::new(FixedGenerator("Aspirin relieves pain [SOURCE: aspirin.txt].")));
        let questions = vec![question("q1", "what relieves pain"), question("q2", "quantum physics")];

        let report = evaluate_rag(&pipeline, &questions, 3, &GroundingEvaluator::default()).await;

        assert_eq!(report.records.len(), 2);
        assert!(report.failures.is_empty());
        // 근거가 없으면 답변 없음
        assert!(report.records[1].answer.is_none());

        let summary = report.summary;
        assert_eq!(summary.answered, 1);
        assert_eq!(summary.keyword_coverage, Some(0.5));
        assert_eq!(summary.citation_rate, Some(1.0));
        assert_eq!(summary.context_overlap, Some(1.0));
        assert_eq!(summary.grounding.grounding_rate, Some(1.0));
        assert_eq!(summary.grounding.skipped_records, 1);
        assert!(summary.grounding.integrity_violations.is_empty());
    }

    #[tokio::test]
    async fn test_collect_records_collects_failures() {
        let pipeline = RagPipeline::new(Arc::new(Bm25Index::new(vec![])));
        let (records, failures) = collect_records(&pipeline, &[question("q1", "x")], 0).await;

        assert!(records.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "q1");
    }
}
