//! Reranker - 쌍별 관련도 재순위
//!
//! 후보 청크마다 (query, text) 관련도를 계산해 내림차순으로 다시 정렬하고
//! 상위 k개만 남깁니다. 청크 내용은 바꾸지 않고 후보를 추가하지도 않습니다.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::chunk::{ScoreSource, ScoredChunk};
use super::lexical::tokenize;

// ============================================================================
// RelevanceScorer Trait
// ============================================================================

/// 쌍별 관련도 스코어러
///
/// 입력 텍스트 순서대로 스코어를 반환해야 합니다 (높을수록 관련).
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

// ============================================================================
// Reranker
// ============================================================================

pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>) -> Self {
        Self { scorer }
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// 재순위 후 상위 top_k
    ///
    /// 동점은 입력 순서를 유지합니다.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if candidates.is_empty() || top_k == 0 {
            return Ok(vec![]);
        }

        let texts: Vec<&str> = candidates.iter().map(|c| c.chunk.text.as_str()).collect();
        let scores = self
            .scorer
            .score(query, &texts)
            .await
            .with_context(|| format!("Reranker {} failed", self.scorer.name()))?;

        if scores.len() != candidates.len() {
            anyhow::bail!(
                "Reranker {} returned {} scores for {} candidates",
                self.scorer.name(),
                scores.len(),
                candidates.len()
            );
        }

        let mut ranked: Vec<ScoredChunk> = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, score)| ScoredChunk::new(score, ScoreSource::CrossEncoder, candidate.chunk))
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);

        Ok(ranked)
    }
}

// ============================================================================
// Term Overlap Scorer
// ============================================================================

/// 오프라인 단어 겹침 스코어러
///
/// score = 텍스트에 등장하는 쿼리 고유 토큰 비율 (0.0 ~ 1.0)
#[derive(Debug, Clone, Default)]
pub struct TermOverlapScorer;

impl TermOverlapScorer {
    pub fn score_one(query_terms: &HashSet<String>, text: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let text_terms: HashSet<String> = tokenize(text).into_iter().collect();
        let hits = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
        hits as f32 / query_terms.len() as f32
    }
}

#[async_trait]
impl RelevanceScorer for TermOverlapScorer {
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        Ok(texts
            .iter()
            .map(|text| Self::score_one(&query_terms, text))
            .collect())
    }

    fn name(&self) -> &str {
        "term-overlap"
    }
}

// ============================================================================
// HTTP Cross-Encoder
// ============================================================================

/// text-embeddings-inference 호환 `/rerank` 엔드포인트
///
/// source: https://huggingface.github.io/text-embeddings-inference/
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

impl HttpCrossEncoder {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// 서버 응답(index, score) → 입력 순서 스코어 배열
fn scores_in_input_order(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for hit in hits {
        let slot = scores
            .get_mut(hit.index)
            .ok_or_else(|| anyhow::anyhow!("Rerank index {} out of range", hit.index))?;
        *slot = Some(hit.score);
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| anyhow::anyhow!("Rerank response missing index {}", i)))
        .collect()
}

#[async_trait]
impl RelevanceScorer for HttpCrossEncoder {
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        let url = format!("{}/rerank", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RerankRequest { query, texts })
            .send()
            .await
            .context("Failed to send rerank request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            anyhow::bail!("Rerank server error ({}): {}", status, body);
        }

        let hits: Vec<RerankHit> =
            serde_json::from_str(&body).context("Failed to parse rerank response")?;
        scores_in_input_order(hits, texts.len())
    }

    fn name(&self) -> &str {
        "cross-encoder"
    }
}
