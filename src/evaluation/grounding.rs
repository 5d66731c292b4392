//! Grounding Evaluator - 답변 근거성 / 환각률
//!
//! 생성된 답변을 검색된 청크와 어휘 수준에서 비교합니다.
//! - 답변 단위: 답변 고유 토큰 중 컨텍스트에 있는 비율
//! - 문장 단위: 겹침 비율이 임계값(τ) 이상이면 근거 있는 문장
//!
//! 근거 청크 없이 답변을 채점하면 0점이 아니라 IntegrityError입니다.
//! 0점은 "전부 환각"이라는 다른 주장이기 때문입니다.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{RagError, Result};
use crate::knowledge::{split_sentences, Chunk};

use super::EvaluationRecord;

/// 기본 문장 근거 임계값
pub const DEFAULT_GROUNDING_THRESHOLD: f32 = 0.3;

/// 토큰 최소 길이 (문자 수)
const MIN_TOKEN_CHARS: usize = 3;

/// `[1]`, `[SOURCE: a.txt]`, `(page 3)` 같은 인용 표시
static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)").expect("Invalid regex"));

/// 불용어 (3자 이상만 의미 있음)
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "his", "how", "its", "may", "who", "did", "yes", "she",
    "him", "this", "that", "with", "from", "they", "them", "then", "than", "there", "their",
    "these", "those", "what", "when", "where", "which", "while", "will", "would", "should",
    "could", "into", "onto", "about", "also", "been", "being", "were", "does", "doing", "each",
    "such", "some", "only", "other", "over", "very", "more", "most", "just", "your", "upon",
];

// ============================================================================
// Normalization
// ============================================================================

/// 비교용 토큰 정규화
///
/// 인용 표시 제거 → 소문자 → 구두점 제거 → 공백 분리 → 불용어/짧은 토큰 제거
pub fn normalize_tokens(text: &str) -> Vec<String> {
    let stripped = CITATION_RE.replace_all(text, " ");
    let lowered: String = stripped
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    lowered
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// 고유 토큰 중 컨텍스트에 있는 비율 (토큰이 없으면 None)
pub fn overlap_ratio(tokens: &HashSet<String>, context: &HashSet<String>) -> Option<f32> {
    if tokens.is_empty() {
        return None;
    }
    let hits = tokens.iter().filter(|t| context.contains(*t)).count();
    Some(hits as f32 / tokens.len() as f32)
}

fn context_tokens(chunks: &[Chunk]) -> HashSet<String> {
    chunks
        .iter()
        .flat_map(|c| normalize_tokens(&c.text))
        .collect()
}

// ============================================================================
// Types
// ============================================================================

/// 문장 하나의 채점 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentenceScore {
    pub sentence: String,
    pub overlap: f32,
    pub grounded: bool,
}

/// 답변 하나의 채점 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundingReport {
    /// 답변 단위 겹침 (정의되지 않으면 None)
    pub answer_overlap: Option<f32>,
    /// 채점된 문장 (토큰이 없는 문장은 제외)
    pub sentences: Vec<SentenceScore>,
}

impl GroundingReport {
    pub fn scored_sentences(&self) -> usize {
        self.sentences.len()
    }

    pub fn grounded_sentences(&self) -> usize {
        self.sentences.iter().filter(|s| s.grounded).count()
    }
}

/// 평가 세트 요약
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroundingSummary {
    /// 채점된 답변 수
    pub evaluated_answers: usize,
    /// 답변이 없어 건너뛴 레코드 수 (검색 전용)
    pub skipped_records: usize,
    pub scored_sentences: usize,
    pub grounded_sentences: usize,
    /// grounded / scored (채점된 문장이 없으면 None)
    pub grounding_rate: Option<f64>,
    /// hallucinated / scored (채점된 문장이 없으면 None)
    pub hallucination_rate: Option<f64>,
    /// 답변 단위 겹침 평균
    pub mean_answer_overlap: Option<f64>,
    /// 근거 청크 없이 답변이 있는 question_id
    pub integrity_violations: Vec<String>,
}

// ============================================================================
// GroundingEvaluator
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct GroundingEvaluator {
    threshold: f32,
}

impl Default for GroundingEvaluator {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_GROUNDING_THRESHOLD,
        }
    }
}

impl GroundingEvaluator {
    /// 임계값 지정 (0.0 ~ 1.0)
    pub fn new(threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RagError::InvalidConfig(format!(
                "grounding threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 답변 단위 겹침
    ///
    /// 빈 답변 → None. 답변이 있는데 청크가 없으면 IntegrityError.
    pub fn answer_overlap(&self, answer: &str, chunks: &[Chunk]) -> Result<Option<f32>> {
        if answer.trim().is_empty() {
            return Ok(None);
        }
        if chunks.is_empty() {
            return Err(RagError::Integrity(
                "answer has no retrieved chunks to be graded against".to_string(),
            ));
        }

        let tokens: HashSet<String> = normalize_tokens(answer).into_iter().collect();
        Ok(overlap_ratio(&tokens, &context_tokens(chunks)))
    }

    /// 답변 + 문장 단위 채점
    pub fn evaluate(&self, answer: &str, chunks: &[Chunk]) -> Result<GroundingReport> {
        let answer_overlap = self.answer_overlap(answer, chunks)?;
        if answer_overlap.is_none() && answer.trim().is_empty() {
            return Ok(GroundingReport {
                answer_overlap,
                sentences: vec![],
            });
        }

        let context = context_tokens(chunks);
        let sentences = split_sentences(answer)
            .into_iter()
            .filter_map(|sentence| {
                let tokens: HashSet<String> = normalize_tokens(&sentence).into_iter().collect();
                let overlap = overlap_ratio(&tokens, &context)?;
                Some(SentenceScore {
                    grounded: overlap >= self.threshold,
                    sentence,
                    overlap,
                })
            })
            .collect();

        Ok(GroundingReport {
            answer_overlap,
            sentences,
        })
    }

    /// 평가 세트 요약
    ///
    /// 답변 없는 레코드는 건너뛰고, 근거 없는 답변은 위반으로 기록한 뒤 계속합니다.
    pub fn summarize(&self, records: &[EvaluationRecord]) -> GroundingSummary {
        let mut summary = GroundingSummary::default();
        let mut overlaps = Vec::new();

        for record in records {
            let answer = match record.answer.as_deref() {
                Some(answer) if !answer.trim().is_empty() => answer,
                _ => {
                    summary.skipped_records += 1;
                    continue;
                }
            };

            match self.evaluate(answer, &record.retrieved_chunks) {
                Ok(report) => {
                    summary.evaluated_answers += 1;
                    summary.scored_sentences += report.scored_sentences();
                    summary.grounded_sentences += report.grounded_sentences();
                    if let Some(overlap) = report.answer_overlap {
                        overlaps.push(overlap as f64);
                    }
                }
                Err(e) => {
                    tracing::warn!("Integrity violation for {}: {}", record.question_id, e);
                    summary.integrity_violations.push(record.question_id.clone());
                }
            }
        }

        if summary.scored_sentences > 0 {
            let scored = summary.scored_sentences as f64;
            let grounded = summary.grounded_sentences as f64;
            summary.grounding_rate = Some(grounded / scored);
            summary.hallucination_rate = Some((scored - grounded) / scored);
        }

        if !overlaps.is_empty() {
            summary.mean_answer_overlap = Some(overlaps.iter().sum::<f64>() / overlaps.len() as f64);
        }

        summary
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunk(text: &str) -> Chunk {
        Chunk::new("doc", 0, text, "doc.txt", None)
    }

    fn record(id: &str, answer: Option<&str>, chunks: Vec<Chunk>) -> EvaluationRecord {
        EvaluationRecord {
            question_id: id.to_string(),
            question: "q".to_string(),
            answer: answer.map(str::to_string),
            retrieved_chunks: chunks,
            expected_keywords: vec![],
        }
    }

    #[test]
    fn test_normalize_tokens() {
        assert_eq!(
            normalize_tokens("The drug [1] treats pain (see page 3), and fever!"),
            vec!["drug", "treats", "pain", "fever"]
        );
        assert!(normalize_tokens("It is a [SOURCE: x.txt]").is_empty());
    }

    #[test]
    fn test_grounded_sentence() {
        let evaluator = GroundingEvaluator::default();
        let chunks = vec![chunk("Aspirin treats pain and inflammation.")];

        let report = evaluator.evaluate("The drug treats pain.", &chunks).unwrap();
        assert_eq!(report.scored_sentences(), 1);
        assert!(report.sentences[0].grounded);
        assert!((report.sentences[0].overlap - 2.0 / 3.0).abs() < 1e-6);
        assert!((report.answer_overlap.unwrap() - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_hallucinated_sentence() {
        let evaluator = GroundingEvaluator::default();
        let chunks = vec![chunk("Aspirin treats pain and inflammation.")];

        let report = evaluator
            .evaluate("Aspirin treats pain. Statins lower cholesterol levels quickly.", &chunks)
            .unwrap();
        assert_eq!(report.scored_sentences(), 2);
        assert_eq!(report.grounded_sentences(), 1);
        assert!(!report.sentences[1].grounded);
    }

    #[test]
    fn test_answer_without_chunks_is_integrity_error() {
        let evaluator = GroundingEvaluator::default();
        let err = evaluator.evaluate("Aspirin treats pain.", &[]).unwrap_err();
        assert!(matches!(err, RagError::Integrity(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Integrity);
    }

    #[test]
    fn test_empty_answer_is_undefined() {
        let evaluator = GroundingEvaluator::default();
        let report = evaluator.evaluate("  ", &[]).unwrap();
        assert!(report.answer_overlap.is_none());
        assert!(report.sentences.is_empty());

        // 토큰이 없는 문장은 채점하지 않음
        let report = evaluator.evaluate("It is so.", &[chunk("anything here")]).unwrap();
        assert!(report.answer_overlap.is_none());
        assert_eq!(report.scored_sentences(), 0);
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(GroundingEvaluator::new(1.5).is_err());
        assert!(GroundingEvaluator::new(-0.1).is_err());
        assert_eq!(GroundingEvaluator::new(0.5).unwrap().threshold(), 0.5);
    }

    #[test]
    fn test_summarize_records_violations_and_continues() {
        let evaluator = GroundingEvaluator::default();
        let context = vec![chunk("Aspirin treats pain and inflammation.")];
        let records = vec![
            record("q1", Some("Aspirin treats pain. Statins lower cholesterol."), context.clone()),
            record("q2", Some("Insulin lowers sugar."), vec![]),
            record("q3", None, context.clone()),
            record("q4", Some("Aspirin reduces inflammation."), context),
        ];

        let summary = evaluator.summarize(&records);
        assert_eq!(summary.evaluated_answers, 2);
        assert_eq!(summary.skipped_records, 1);
        assert_eq!(summary.integrity_violations, vec!["q2"]);
        assert_eq!(summary.scored_sentences, 3);
        assert_eq!(summary.grounded_sentences, 2);

        let g = summary.grounding_rate.unwrap();
        let h = summary.hallucination_rate.unwrap();
        assert!((g - 2.0 / 3.0).abs() < 1e-9);
        assert!((g + h - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_summarize_nothing_scored() {
        let evaluator = GroundingEvaluator::default();
        let summary = evaluator.summarize(&[record("q1", None, vec![])]);
        assert!(summary.grounding_rate.is_none());
        assert!(summary.hallucination_rate.is_none());
        assert!(summary.mean_answer_overlap.is_none());
    }

    proptest! {
        #[test]
        fn prop_rates_sum_to_one(
            answers in prop::collection::vec(
                prop::collection::vec(
                    prop::sample::select(vec!["aspirin", "pain", "statins", "fever", "blood", "the"]),
                    0..6,
                ),
                1..6,
            ),
        ) {
            let evaluator = GroundingEvaluator::default();
            let context = vec![chunk("Aspirin relieves pain and fever.")];
            let records: Vec<EvaluationRecord> = answers
                .iter()
                .enumerate()
                .map(|(i, words)| {
                    let answer = format!("{}.", words.join(" "));
                    record(&format!("q{}", i), Some(answer.as_str()), context.clone())
                })
                .collect();

            let summary = evaluator.summarize(&records);
            match (summary.grounding_rate, summary.hallucination_rate) {
                (Some(g), Some(h)) => {
                    prop_assert!(summary.scored_sentences > 0);
                    prop_assert!((g + h - 1.0).abs() < 1e-9);
                }
                (None, None) => prop_assert_eq!(summary.scored_sentences, 0),
                _ => prop_assert!(false, "rates must be both defined or both undefined"),
            }
        }
    }
}
