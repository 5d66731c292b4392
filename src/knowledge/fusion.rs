//! RRF (Reciprocal Rank Fusion)
//!
//! 서로 비교할 수 없는 스코어(L2 거리, BM25)를 순위만으로 통합합니다.
//!
//! RRF Score = sum(1 / (K + rank + 1)), rank는 0부터
//! K = 60 (기본값, 높은 순위에 더 많은 가중치)
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;
use std::collections::HashSet;

use crate::error::{RagError, Result};

use super::chunk::{Chunk, ScoreSource, ScoredChunk};

/// 기본 RRF 상수
pub const DEFAULT_RRF_K: f64 = 60.0;

/// RRF 통합기
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfFusion {
    k: f64,
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K }
    }
}

impl RrfFusion {
    /// K 지정 (0 이상의 유한값)
    pub fn new(k: f64) -> Result<Self> {
        if !k.is_finite() || k < 0.0 {
            return Err(RagError::InvalidConfig(format!(
                "RRF constant must be a non-negative number, got {}",
                k
            )));
        }
        Ok(Self { k })
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    /// 0-based 순위의 기여분
    pub fn contribution(&self, rank: usize) -> f64 {
        1.0 / (self.k + rank as f64 + 1.0)
    }

    /// 여러 순위 목록 통합
    ///
    /// chunk_id 기준으로 기여분을 합산합니다.
    /// 같은 목록 안의 중복은 첫 순위만 반영합니다.
    /// 스코어 내림차순, 동점은 chunk_id 오름차순.
    pub fn fuse(&self, lists: &[Vec<ScoredChunk>], limit: usize) -> Vec<ScoredChunk> {
        // chunk_id -> (rrf_score, 첫 등장 청크)
        let mut scores: HashMap<&str, (f64, &Chunk)> = HashMap::new();

        for list in lists {
            let mut seen: HashSet<&str> = HashSet::new();
            for (rank, result) in list.iter().enumerate() {
                let id = result.chunk.chunk_id.as_str();
                if !seen.insert(id) {
                    continue;
                }
                let entry = scores.entry(id).or_insert((0.0, &result.chunk));
                entry.0 += self.contribution(rank);
            }
        }

        let mut results: Vec<(&str, f64, &Chunk)> = scores
            .into_iter()
            .map(|(id, (score, chunk))| (id, score, chunk))
            .collect();

        results.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        results.truncate(limit);

        results
            .into_iter()
            .map(|(_, score, chunk)| ScoredChunk::new(score as f32, ScoreSource::Rrf, chunk.clone()))
            .collect()
    }
}
