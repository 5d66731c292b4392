//! Document Registry - rusqlite 기반 문서 출처 기록
//!
//! 수집된 문서마다 (document_id, source, num_chunks, ingested_at)를 기록합니다.
//! 청크 자체는 벡터 인덱스 파일 쌍에 저장되고, 여기에는 출처만 남습니다.
//! 저장 위치: ~/.ragcheck/documents.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 문서 기록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub source: String,
    pub num_chunks: usize,
    pub ingested_at: DateTime<Utc>,
}

/// 레지스트리 통계
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub document_count: usize,
    pub total_chunks: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// DocumentRegistry
// ============================================================================

/// 문서 레지스트리
pub struct DocumentRegistry {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl DocumentRegistry {
    /// 레지스트리 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        registry.initialize()?;
        Ok(registry)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                document_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                num_chunks INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create documents table")?;

        tracing::debug!("Document registry initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 문서 기록 (같은 document_id가 있으면 교체)
    pub fn register(&self, document_id: &str, source: &str, num_chunks: usize) -> Result<DocumentRecord> {
        let record = DocumentRecord {
            document_id: document_id.to_string(),
            source: source.to_string(),
            num_chunks,
            ingested_at: Utc::now(),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (document_id, source, num_chunks, ingested_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.document_id,
                record.source,
                record.num_chunks as i64,
                record.ingested_at.to_rfc3339()
            ],
        )
        .context("Failed to register document")?;

        tracing::info!(
            "Registered document: {} ({} chunks)",
            record.document_id,
            record.num_chunks
        );

        Ok(record)
    }

    /// ID로 문서 조회
    pub fn get(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.lock()?;

        let record = conn
            .query_row(
                "SELECT document_id, source, num_chunks, ingested_at FROM documents
                 WHERE document_id = ?1",
                params![document_id],
                row_to_record,
            )
            .optional()
            .context("Failed to query document")?;

        Ok(record)
    }

    /// 등록 여부
    pub fn contains(&self, document_id: &str) -> Result<bool> {
        Ok(self.get(document_id)?.is_some())
    }

    /// 문서 목록 (수집 순서)
    pub fn list(&self) -> Result<Vec<DocumentRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT document_id, source, num_chunks, ingested_at FROM documents
             ORDER BY ingested_at ASC, document_id ASC",
        )?;

        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list documents")?;

        Ok(records)
    }

    /// 문서 기록 삭제
    pub fn delete(&self, document_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM documents WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(rows > 0)
    }

    /// 전체 삭제 (인덱스 리셋과 함께 사용)
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents", [])?;
        tracing::info!("Cleared {} document records", rows);
        Ok(rows)
    }

    /// 레지스트리 통계
    pub fn stats(&self) -> Result<RegistryStats> {
        let conn = self.lock()?;

        let (count, total_chunks): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(num_chunks), 0) FROM documents",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(RegistryStats {
            document_count: count as usize,
            total_chunks: total_chunks as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        document_id: row.get(0)?,
        source: row.get(1)?,
        num_chunks: row.get::<_, i64>(2)? as usize,
        ingested_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
