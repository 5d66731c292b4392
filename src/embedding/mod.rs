//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트를 벡터로 변환하는 프로바이더입니다.
//! - `OllamaEmbedding`: 로컬 Ollama 서버 (`/api/embed`)
//! - `HashingEmbedding`: 해시 기반 단어 빈도 벡터 (오프라인, 결정적)
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config.embedding)?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::knowledge::tokenize;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

/// L2 정규화 (영벡터는 그대로)
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-10 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// 503/429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;
/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Ollama 임베딩 구현체
///
/// source: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings
#[derive(Debug)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    normalize: bool,
}

/// Ollama `/api/embed` 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Ollama `/api/embed` 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama 에러 응답
#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaEmbedding {
    /// 새 Ollama 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `base_url` - Ollama 서버 주소 (예: http://localhost:11434)
    /// * `model` - 임베딩 모델 이름
    /// * `dimension` - 기대 차원 (응답과 다르면 에러)
    pub fn new(base_url: &str, model: &str, dimension: usize, normalize: bool) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0. Embedding dimension must be positive");
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
            normalize,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.model, config.dimension, config.normalize)
    }

    /// `/api/embed` 호출 (재시도 포함)
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 재시도 루프 (연결 실패, 429/503 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

            let response = match self.client.post(&url).json(&request).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let embed_response: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                return Ok(embed_response.embeddings);
            }

            // 모델 로딩 중 (503) 또는 과부하 (429) - 재시도
            if matches!(status.as_u16(), 429 | 503) {
                tracing::warn!(
                    "Ollama busy ({}), backing off {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Ollama busy ({})", status));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                // 다른 에러 - 즉시 실패
                if let Ok(error) = serde_json::from_str::<OllamaError>(&body) {
                    anyhow::bail!("Ollama embedding error ({}): {}", status, error.error);
                }
                anyhow::bail!("Ollama embedding error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    /// 차원 검증 + 정규화
    fn finish(&self, mut vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected {
            anyhow::bail!(
                "Ollama returned {} embeddings for {} inputs",
                vectors.len(),
                expected
            );
        }

        for vector in &mut vectors {
            if vector.len() != self.dimension {
                anyhow::bail!(
                    "Embedding dimension mismatch: configured {}, model {} returned {}",
                    self.dimension,
                    self.model,
                    vector.len()
                );
            }
            if self.normalize {
                l2_normalize(vector);
            }
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let input = [text.to_string()];
        let vectors = self.request(&input).await?;
        let mut vectors = self.finish(vectors, 1)?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!("Embedding batch of {} texts with {}", texts.len(), self.model);
        let vectors = self.request(texts).await?;
        self.finish(vectors, texts.len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Hashing Embedding
// ============================================================================

/// 해시 기반 오프라인 임베딩
///
/// 토큰을 djb2 해시로 버킷에 매핑한 단어 빈도 벡터 (L2 정규화).
/// 같은 입력은 항상 같은 벡터가 됩니다. 의미 유사도는 없고 어휘 겹침만 반영합니다.
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
}

impl HashingEmbedding {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0. Embedding dimension must be positive");
        }
        Ok(Self { dimension })
    }

    fn djb2(token: &str) -> u64 {
        token
            .bytes()
            .fold(5381u64, |hash, b| hash.wrapping_mul(33).wrapping_add(b as u64))
    }

    /// 동기 임베딩
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for token in tokenize(text) {
            let bucket = (Self::djb2(&token) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingProviderKind::Ollama => Arc::new(OllamaEmbedding::from_config(config)?),
        EmbeddingProviderKind::Hashing => Arc::new(HashingEmbedding::new(config.dimension)?),
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_invalid_dimension() {
        let result = OllamaEmbedding::new("http://localhost:11434", "m", 0, true);
        assert!(result.is_err());
        assert!(result
            .err()
            .map(|e| e.to_string().contains("Invalid dimension"))
            .unwrap_or(false));
        assert!(HashingEmbedding::new(0).is_err());
    }

    #[test]
    fn test_finish_checks_dimension() {
        let embedder = OllamaEmbedding::new("http://localhost:11434/", "m", 2, true).unwrap();
        assert_eq!(embedder.base_url, "http://localhost:11434");

        let ok = embedder.finish(vec![vec![3.0, 4.0]], 1).unwrap();
        assert!((ok[0][1] - 0.8).abs() < 1e-6);

        assert!(embedder.finish(vec![vec![1.0, 0.0, 0.0]], 1).is_err());
        assert!(embedder.finish(vec![], 1).is_err());
    }

    #[tokio::test]
    async fn test_hashing_embedding_is_deterministic() {
        let embedder = HashingEmbedding::new(64).unwrap();
        let a = embedder.embed("Aspirin treats pain").await.unwrap();
        let b = embedder.embed("aspirin TREATS pain!").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let batch = embedder
            .embed_batch(&["Aspirin treats pain".to_string(), String::new()])
            .await
            .unwrap();
        assert_eq!(batch[0], a);
        assert!(batch[1].iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_empty_text_skips_request() {
        // 서버 없이도 빈 텍스트는 영벡터
        let embedder = OllamaEmbedding::new("http://127.0.0.1:9", "m", 4, true).unwrap();
        assert_eq!(embedder.embed("   ").await.unwrap(), vec![0.0; 4]);
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_create_embedder_from_config() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderKind::Hashing,
            dimension: 32,
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 32);
        assert_eq!(embedder.name(), "hashing");
    }
}
