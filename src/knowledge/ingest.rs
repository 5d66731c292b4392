//! Ingestion - 문서 → 청크 → 임베딩 → 인덱스
//!
//! 파일 단위 실패는 모아서 보고하고 나머지 파일은 계속 처리합니다.
//! 문서 등록은 `commit`에서 인덱스 저장이 성공한 뒤에만 기록됩니다.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::collector::CollectedFile;
use crate::embedding::EmbeddingProvider;
use crate::extractor::{load_document, PageText};

use super::chunker::{chunk_pages, Chunker};
use super::store::DocumentRegistry;
use super::vector::VectorIndex;

/// 임베딩 요청 배치 크기
const EMBED_BATCH_SIZE: usize = 32;

// ============================================================================
// Types
// ============================================================================

/// 문서 하나의 수집 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: String,
    pub source: String,
    pub num_chunks: usize,
    /// 이미 등록된 문서라 건너뜀
    pub skipped: bool,
}

/// 여러 파일 수집 요약
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub reports: Vec<IngestReport>,
    pub failures: Vec<(PathBuf, String)>,
}

impl IngestSummary {
    pub fn indexed_documents(&self) -> usize {
        self.reports.iter().filter(|r| !r.skipped).count()
    }

    pub fn skipped_documents(&self) -> usize {
        self.reports.iter().filter(|r| r.skipped).count()
    }

    pub fn total_chunks(&self) -> usize {
        self.reports.iter().map(|r| r.num_chunks).sum()
    }
}

// ============================================================================
// Indexer
// ============================================================================

/// 수집기
pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    chunker: Box<dyn Chunker>,
    registry: Option<Arc<DocumentRegistry>>,
    /// 인덱스에 추가됐지만 아직 등록되지 않은 문서
    pending: Mutex<HashSet<String>>,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        chunker: Box<dyn Chunker>,
    ) -> Self {
        Self {
            embedder,
            index,
            chunker,
            registry: None,
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// 문서 레지스트리 연결 (등록된 문서는 다시 수집하지 않음)
    ///
    /// 새 문서는 `commit`을 호출해야 등록됩니다.
    pub fn with_registry(mut self, registry: Arc<DocumentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 페이지 텍스트 수집
    pub async fn ingest_pages(
        &self,
        document_id: &str,
        source: &str,
        pages: &[PageText],
    ) -> Result<IngestReport> {
        let registered = match &self.registry {
            Some(registry) => registry.contains(document_id)?,
            None => false,
        };
        if registered || self.pending()?.contains(document_id) {
            tracing::info!("Skipping already ingested document: {}", document_id);
            return Ok(IngestReport {
                document_id: document_id.to_string(),
                source: source.to_string(),
                num_chunks: 0,
                skipped: true,
            });
        }

        let chunks = chunk_pages(pages, document_id, source, self.chunker.as_ref());
        if chunks.is_empty() {
            tracing::warn!("No chunks generated for document: {}", source);
        }

        // 임베딩 생성 (배치 단위)
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self
                .embedder
                .embed_batch(&texts)
                .await
                .with_context(|| format!("Failed to embed chunks of {}", source))?;
            vectors.extend(embedded);
        }

        self.index
            .add(&vectors, &chunks)
            .with_context(|| format!("Failed to index chunks of {}", source))?;

        self.pending()?.insert(document_id.to_string());

        tracing::info!(
            "Ingested document: {} (id={}, chunks={})",
            source,
            document_id,
            chunks.len()
        );

        Ok(IngestReport {
            document_id: document_id.to_string(),
            source: source.to_string(),
            num_chunks: chunks.len(),
            skipped: false,
        })
    }

    /// 파일 하나 수집
    pub async fn ingest_file(&self, file: &CollectedFile) -> Result<IngestReport> {
        let pages = load_document(&file.path, file.file_type).await?;
        self.ingest_pages(&file.document_id(), &file.source_name(), &pages)
            .await
    }

    /// 여러 파일 수집 (실패는 모아서 반환)
    pub async fn ingest_files(&self, files: &[CollectedFile]) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for (i, file) in files.iter().enumerate() {
            tracing::debug!("Ingesting {}/{}: {:?}", i + 1, files.len(), file.path);
            match self.ingest_file(file).await {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    tracing::warn!("Failed to ingest {:?}: {:#}", file.path, e);
                    summary.failures.push((file.path.clone(), format!("{:#}", e)));
                }
            }
        }

        summary
    }

    /// 인덱스 저장 후 새 문서 등록
    ///
    /// 저장이 실패하면 아무것도 등록하지 않으므로 다음 수집에서 다시 처리됩니다.
    pub fn commit(
        &self,
        summary: &IngestSummary,
        index_path: &Path,
        metadata_path: &Path,
    ) -> Result<usize> {
        if summary.indexed_documents() == 0 {
            return Ok(0);
        }

        self.index
            .save(index_path, metadata_path)
            .context("Failed to save vector index")?;

        let mut committed = 0;
        if let Some(registry) = &self.registry {
            for report in summary.reports.iter().filter(|r| !r.skipped) {
                registry.register(&report.document_id, &report.source, report.num_chunks)?;
                committed += 1;
            }
        }
        self.pending()?.clear();

        Ok(committed)
    }

    fn pending(&self) -> Result<std::sync::MutexGuard<'_, HashSet<String>>> {
        self.pending
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }
}

// ============================================================================
// Registry Reconciliation
// ============================================================================

/// 레지스트리 정리 결과
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 인덱스에 없어 삭제된 기록
    pub removed: Vec<String>,
    /// 인덱스에만 있어 새로 기록된 문서
    pub restored: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty() && self.restored.is_empty()
    }
}

/// 레지스트리를 저장된 인덱스 내용에 맞춤
///
/// 인덱스 파일 쌍이 기준입니다. 인덱스에 없는 기록은 지우고,
/// 인덱스에만 있는 문서는 청크 메타데이터로 다시 기록합니다.
pub fn reconcile_registry(
    index: &VectorIndex,
    registry: &DocumentRegistry,
) -> Result<ReconcileReport> {
    // document_id -> (source, num_chunks)
    let mut indexed: BTreeMap<String, (String, usize)> = BTreeMap::new();
    for chunk in index.chunks()? {
        let entry = indexed
            .entry(chunk.document_id.clone())
            .or_insert_with(|| (chunk.source().to_string(), 0));
        entry.1 += 1;
    }

    let mut report = ReconcileReport::default();

    for record in registry.list()? {
        if !indexed.contains_key(&record.document_id) {
            registry.delete(&record.document_id)?;
            report.removed.push(record.document_id);
        }
    }

    for (document_id, (source, num_chunks)) in &indexed {
        if !registry.contains(document_id)? {
            registry.register(document_id, source, *num_chunks)?;
            report.restored.push(document_id.clone());
        }
    }

    if !report.is_clean() {
        tracing::warn!(
            "Registry reconciled with index: removed {:?}, restored {:?}",
            report.removed,
            report.restored
        );
    }

    Ok(report)
}

// ============================================================================
// Tests
// ============================================================================
