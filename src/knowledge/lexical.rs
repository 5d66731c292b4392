//! Lexical Index - BM25 희소 검색
//!
//! 코퍼스와 쿼리에 같은 토크나이저를 적용합니다.
//! 추가만 가능 (`extend`), 삭제는 전체 재생성.
//!
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25

use std::collections::HashMap;

use super::chunk::{Chunk, ScoreSource, ScoredChunk};

// ============================================================================
// Tokenizer
// ============================================================================

/// 소문자화 → `[a-z0-9]`와 공백 외 문자를 공백으로 치환 → 공백 분리
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned.split_whitespace().map(str::to_string).collect()
}

// ============================================================================
// Parameters
// ============================================================================

/// BM25 파라미터
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// 단어 빈도 포화 계수
    pub k1: f32,
    /// 문서 길이 정규화 강도 (0 = 없음, 1 = 완전)
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

// ============================================================================
// Bm25Index
// ============================================================================

/// 토큰화된 청크 한 개
#[derive(Debug, Clone)]
struct TokenizedDoc {
    term_freqs: HashMap<String, u32>,
    length: usize,
}

impl TokenizedDoc {
    fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        let mut term_freqs = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }
        Self {
            term_freqs,
            length: tokens.len(),
        }
    }
}

/// BM25 인덱스
#[derive(Debug, Clone)]
pub struct Bm25Index {
    params: Bm25Params,
    chunks: Vec<Chunk>,
    docs: Vec<TokenizedDoc>,
    /// term → 포함 문서 수
    doc_freqs: HashMap<String, usize>,
    total_length: usize,
}

impl Bm25Index {
    /// 기본 파라미터(k1=1.5, b=0.75)로 생성
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self::with_params(chunks, Bm25Params::default())
    }

    pub fn with_params(chunks: Vec<Chunk>, params: Bm25Params) -> Self {
        let mut index = Self {
            params,
            chunks: Vec::new(),
            docs: Vec::new(),
            doc_freqs: HashMap::new(),
            total_length: 0,
        };
        index.extend(chunks);
        index
    }

    /// 청크 추가 (기존 순서 뒤에 붙음)
    pub fn extend(&mut self, chunks: impl IntoIterator<Item = Chunk>) {
        for chunk in chunks {
            let doc = TokenizedDoc::new(&chunk.text);
            for term in doc.term_freqs.keys() {
                *self.doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            self.total_length += doc.length;
            self.docs.push(doc);
            self.chunks.push(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    fn avg_length(&self) -> f32 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_length as f32 / self.docs.len() as f32
        }
    }

    /// IDF = ln(1 + (N - df + 0.5) / (df + 0.5))
    fn idf(&self, term: &str) -> f32 {
        let n = self.docs.len() as f32;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// 코퍼스 순서대로 전체 스코어 계산
    ///
    /// 쿼리에 같은 단어가 반복되면 반복 횟수만큼 더해집니다.
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let terms = tokenize(query);
        let avg_length = self.avg_length();
        let Bm25Params { k1, b } = self.params;

        let idfs: Vec<(String, f32)> = terms
            .into_iter()
            .map(|t| {
                let idf = self.idf(&t);
                (t, idf)
            })
            .collect();

        self.docs
            .iter()
            .map(|doc| {
                let norm = if avg_length > 0.0 {
                    1.0 - b + b * doc.length as f32 / avg_length
                } else {
                    1.0
                };

                idfs.iter()
                    .map(|(term, idf)| match doc.term_freqs.get(term) {
                        Some(&tf) => {
                            let tf = tf as f32;
                            idf * tf * (k1 + 1.0) / (tf + k1 * norm)
                        }
                        None => 0.0,
                    })
                    .sum()
            })
            .collect()
    }

    /// 상위 k개 검색
    ///
    /// 스코어 내림차순, 동점은 코퍼스 순서.
    /// 어떤 쿼리 단어도 매칭되지 않은 청크는 제외합니다.
    pub fn retrieve(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        if k == 0 || self.chunks.is_empty() {
            return vec![];
        }

        let mut ranked: Vec<(usize, f32)> = self
            .scores(query)
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();

        // sort_by는 안정 정렬
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(i, score)| ScoredChunk::new(score, ScoreSource::Bm25, self.chunks[i].clone()))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk::with_id(id, id, 0, text, format!("{}.txt", id), None)
    }

    fn corpus() -> Vec<Chunk> {
        vec![
            chunk("aspirin", "Aspirin is used to reduce fever and relieve mild pain."),
            chunk("insulin", "Insulin regulates blood sugar in patients with diabetes."),
            chunk("statin", "Statins lower cholesterol and reduce cardiovascular risk."),
        ]
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Hello, World! COVID-19 (x2)"),
            vec!["hello", "world", "covid", "19", "x2"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_term_ranks_matching_chunk_first() {
        let index = Bm25Index::new(corpus());
        let results = index.retrieve("aspirin", 3);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "aspirin");
        assert_eq!(results[0].source, ScoreSource::Bm25);
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_two_chunk_corpus() {
        let index = Bm25Index::new(vec![
            chunk("a", "aspirin pain relief"),
            chunk("b", "unrelated topic"),
        ]);
        let results = index.retrieve("aspirin", 2);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "a");
    }

    #[test]
    fn test_retrieve_orders_by_score() {
        let index = Bm25Index::new(corpus());
        let results = index.retrieve("reduce pain", 3);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_id, "aspirin");
        assert_eq!(results[1].chunk.chunk_id, "statin");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_ties_keep_corpus_order() {
        let index = Bm25Index::new(vec![
            chunk("a", "alpha beta"),
            chunk("b", "gamma delta"),
            chunk("c", "alpha beta"),
        ]);
        let ids: Vec<String> = index
            .retrieve("alpha", 5)
            .into_iter()
            .map(|r| r.chunk.chunk_id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_no_match_returns_empty() {
        let index = Bm25Index::new(corpus());
        assert!(index.retrieve("quantum chromodynamics", 5).is_empty());
        assert!(index.retrieve("", 5).is_empty());
        assert!(index.retrieve("aspirin", 0).is_empty());
        assert!(Bm25Index::new(vec![]).retrieve("aspirin", 5).is_empty());
    }

    #[test]
    fn test_repeated_query_terms_accumulate() {
        let index = Bm25Index::new(corpus());
        let once = index.scores("insulin")[1];
        let twice = index.scores("insulin insulin")[1];
        assert!((twice - 2.0 * once).abs() < 1e-5);
    }

    #[test]
    fn test_extend_updates_statistics() {
        let mut index = Bm25Index::new(corpus());
        let before = index.scores("aspirin")[0];

        index.extend(vec![chunk("aspirin2", "Aspirin thins the blood.")]);
        assert_eq!(index.len(), 4);

        // df가 늘어나면 IDF가 줄어듦
        let after = index.scores("aspirin")[0];
        assert!(after < before);
        assert_eq!(index.retrieve("aspirin", 5).len(), 2);
    }
}
