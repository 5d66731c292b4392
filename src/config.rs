//! 설정 - TOML 파일 기반
//!
//! 모든 섹션은 `#[serde(default)]`이므로 빈 파일도 유효한 설정입니다.
//! CLI 플래그가 파일 값을 덮어씁니다.
//!
//! ```toml
//! [retrieval]
//! retriever = "hybrid"
//! top_k = 5
//! reranker = "term_overlap"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dimension = 768
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// 인덱스 파일 이름
pub const INDEX_FILE: &str = "index.bin";
/// 청크 메타데이터 파일 이름
pub const METADATA_FILE: &str = "chunks.json";
/// 문서 레지스트리 DB 이름
pub const REGISTRY_FILE: &str = "documents.db";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.ragcheck/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragcheck")
}

// ============================================================================
// Kinds
// ============================================================================

/// 검색기 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverKind {
    /// 벡터 검색만
    Dense,
    /// BM25만
    Bm25,
    /// 벡터 + BM25 (RRF)
    #[default]
    Hybrid,
}

/// 재순위기 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    #[default]
    None,
    /// 오프라인 단어 겹침 스코어
    TermOverlap,
    /// 외부 cross-encoder 서버 (`/rerank`)
    CrossEncoder,
}

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    #[default]
    Ollama,
    /// 해시 기반 오프라인 임베딩
    Hashing,
}

/// 청킹 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// 고정 길이 + 오버랩
    Fixed,
    /// 문장 단위로 묶기
    #[default]
    Sentence,
    /// Markdown 섹션 인식
    Section,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub retriever: RetrieverKind,
    pub top_k: usize,
    pub rrf_k: f64,
    pub reranker: RerankerKind,
    /// cross-encoder 서버 주소 (reranker = "cross_encoder"일 때)
    pub reranker_url: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retriever: RetrieverKind::Hybrid,
            top_k: 5,
            rrf_k: 60.0,
            reranker: RerankerKind::None,
            reranker_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub base_url: String,
    pub dimension: usize,
    /// L2 정규화 여부
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Ollama,
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 768,
            normalize: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub model: String,
    pub base_url: String,
    pub max_context_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "phi3".to_string(),
            base_url: "http://localhost:11434".to_string(),
            max_context_chars: 4000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    pub max_chars: usize,
    /// 고정 길이 전략의 오버랩 (문자 수)
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Sentence,
            max_chars: 800,
            overlap: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub grounding_threshold: f32,
    pub retrieval_k: usize,
    pub rag_k: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            grounding_threshold: 0.3,
            retrieval_k: 5,
            rag_k: 3,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 데이터 디렉토리 (없으면 `get_data_dir()`)
    pub data_dir: Option<PathBuf>,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub chunking: ChunkingConfig,
    pub evaluation: EvaluationConfig,
}

impl RagConfig {
    /// TOML 파일에서 로드 + 검증
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// TOML 문자열 파싱 + 검증
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 파일이 있으면 로드, 없으면 기본값
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// 값 검증
    pub fn validate(&self) -> std::result::Result<(), RagError> {
        let invalid = |msg: &str| -> std::result::Result<(), RagError> {
            Err(RagError::InvalidConfig(msg.to_string()))
        };

        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be positive");
        }
        if !self.retrieval.rrf_k.is_finite() || self.retrieval.rrf_k < 0.0 {
            return invalid("retrieval.rrf_k must be a non-negative number");
        }
        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be positive");
        }
        if self.chunking.max_chars == 0 {
            return invalid("chunking.max_chars must be positive");
        }
        if self.chunking.overlap >= self.chunking.max_chars {
            return invalid("chunking.overlap must be smaller than chunking.max_chars");
        }
        if !(0.0..=1.0).contains(&self.evaluation.grounding_threshold) {
            return invalid("evaluation.grounding_threshold must be within [0, 1]");
        }
        if self.evaluation.retrieval_k == 0 || self.evaluation.rag_k == 0 {
            return invalid("evaluation k values must be positive");
        }

        Ok(())
    }

    /// 실제 데이터 디렉토리
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(get_data_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir().join(INDEX_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir().join(METADATA_FILE)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir().join(REGISTRY_FILE)
    }
}
