//! 콘텐츠 추출 모듈
//!
//! 수집된 파일에서 페이지별 텍스트를 추출합니다.
//! - 텍스트 파일: 직접 읽기 (페이지 번호 없음)
//! - PDF 파일: pdf-extract로 페이지별 추출

pub mod pdf;

use std::path::Path;

use anyhow::{Context, Result};

use crate::collector::FileType;

// ============================================================================
// Page Text
// ============================================================================

/// 추출된 페이지 텍스트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// PDF 페이지 번호 (1부터 시작, 텍스트 파일은 None)
    pub page: Option<u32>,
    /// 정리된 텍스트
    pub text: String,
}

// ============================================================================
// Text Cleaning
// ============================================================================

/// 텍스트 정리
///
/// - 줄 안의 연속 공백을 하나로
/// - 줄 앞뒤 공백 제거
/// - 3줄 이상 빈 줄을 문단 경계(빈 줄 하나)로
///
/// 문단/헤더 구조는 Markdown 청커가 쓰므로 줄바꿈은 유지합니다.
pub fn clean_text(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }

        if !cleaned.is_empty() {
            cleaned.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        cleaned.push_str(&line);
        blank_run = 0;
    }

    cleaned
}

// ============================================================================
// Document Loading
// ============================================================================

/// 문서 로드
///
/// - 텍스트: 페이지 번호 없는 단일 블록
/// - PDF: 페이지마다 한 블록 (빈 페이지 포함, 번호 유지)
pub async fn load_document(path: &Path, file_type: FileType) -> Result<Vec<PageText>> {
    match file_type {
        FileType::Text => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read text file: {:?}", path))?;
            let text = String::from_utf8_lossy(&bytes);

            Ok(vec![PageText {
                page: None,
                text: clean_text(&text),
            }])
        }
        FileType::Pdf => {
            // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
            let owned = path.to_path_buf();
            let pages = tokio::task::spawn_blocking(move || pdf::extract_text_from_pdf(&owned))
                .await
                .context("PDF extraction task failed")??;

            Ok(pages
                .into_iter()
                .enumerate()
                .map(|(i, text)| PageText {
                    page: Some(i as u32 + 1),
                    text: clean_text(&text),
                })
                .collect())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        let text = "  Aspirin   treats\tpain.  \r\nIt reduces fever.\n\n\n\n# Dosage\n  500 mg  ";
        assert_eq!(
            clean_text(text),
            "Aspirin treats pain.\nIt reduces fever.\n\n# Dosage\n500 mg"
        );
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text(" \n \n"), "");
    }

    #[tokio::test]
    async fn test_load_text_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("aspirin.txt");
        std::fs::write(&path, "Aspirin  treats pain.\n").unwrap();

        let pages = load_document(&path, FileType::Text).await.unwrap();
        assert_eq!(
            pages,
            vec![PageText {
                page: None,
                text: "Aspirin treats pain.".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_load_missing_document() {
        let result = load_document(Path::new("/nonexistent/doc.txt"), FileType::Text).await;
        assert!(result.is_err());
    }
}
