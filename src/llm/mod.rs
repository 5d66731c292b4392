//! LLM 모듈 - 답변 생성
//!
//! 검색된 청크로 컨텍스트를 만들고 로컬 Ollama 모델에 질의합니다.
//! 모델에는 컨텍스트 안에서만 답하도록 지시합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::knowledge::Chunk;

/// 컨텍스트에 답이 없을 때 모델이 돌려줄 문장
pub const NO_ANSWER: &str = "I don't know based on the provided context.";

/// 기본 컨텍스트 최대 길이 (문자)
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 4000;

// ============================================================================
// TextGenerator Trait
// ============================================================================

/// 텍스트 생성 트레이트 (prompt → answer)
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    fn name(&self) -> &str;
}

// ============================================================================
// Prompt Builder
// ============================================================================

/// 컨텍스트 + 프롬프트 구성기
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_context_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXT_CHARS)
    }
}

impl PromptBuilder {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    /// 청크 → 참고 컨텍스트
    ///
    /// 블록마다 `[SOURCE: <source>, page <n>]` 헤더를 붙입니다.
    /// 다음 블록이 한도를 넘으면 거기서 멈춥니다.
    pub fn build_context(&self, chunks: &[Chunk]) -> String {
        let mut context = String::new();
        let mut length = 0;

        for chunk in chunks {
            let page = chunk
                .metadata
                .page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            let block = format!(
                "[SOURCE: {}, page {}]\n{}\n\n",
                chunk.source(),
                page,
                chunk.text.trim()
            );

            let block_len = block.chars().count();
            if length + block_len > self.max_context_chars {
                break;
            }

            context.push_str(&block);
            length += block_len;
        }

        context
    }

    /// 최종 프롬프트
    pub fn build_prompt(&self, query: &str, context: &str) -> String {
        format!(
            "Use only the following context to answer the question.\n\
             If the answer is not explicitly stated, respond with:\n\
             \"{}\"\n\n\
             CONTEXT:\n{}\n\n\
             QUESTION:\n{}\n\n\
             ANSWER:",
            NO_ANSWER,
            context.trim_end(),
            query
        )
    }
}

// ============================================================================
// Ollama Generator
// ============================================================================

/// Ollama `/api/generate` 클라이언트
#[derive(Debug)]
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.model)
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send generate request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            anyhow::bail!("Ollama generate error ({}): {}", status, body);
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse generate response")?;
        Ok(parsed.response.trim().to_string())
    }

    fn name(&self) -> &str {
        &self.model
    }
}
