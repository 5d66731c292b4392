//! Chunk Store - 청크 + 임베딩 평행 배열 저장소
//!
//! 슬롯 번호 = 삽입 순서. 벡터 배열과 청크 배열이 같은 슬롯으로 연결됩니다.
//! 추가만 가능하며 삭제는 전체 재생성으로 처리합니다.

use std::ops::Range;

use crate::error::{RagError, Result};

use super::chunk::Chunk;

/// 슬롯 단위 엔트리 뷰
#[derive(Debug, Clone, Copy)]
pub struct IndexedEntry<'a> {
    pub slot: usize,
    pub chunk: &'a Chunk,
    pub embedding: &'a [f32],
}

/// 청크 저장소
///
/// 벡터는 `slot * dimension` 오프셋의 평탄 배열로 보관합니다.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dimension: usize,
    vectors: Vec<f32>,
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    /// 빈 저장소 생성
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// 저장된 평탄 벡터 + 청크로 복원
    pub(crate) fn from_parts(dimension: usize, vectors: Vec<f32>, chunks: Vec<Chunk>) -> Result<Self> {
        if dimension == 0 || vectors.len() != dimension * chunks.len() {
            return Err(RagError::CorruptIndex(format!(
                "{} floats cannot hold {} chunks of dimension {}",
                vectors.len(),
                chunks.len(),
                dimension
            )));
        }
        Ok(Self {
            dimension,
            vectors,
            chunks,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// 배치 검증 (변경 없음)
    pub fn validate_batch(&self, vectors: &[Vec<f32>], chunks: &[Chunk]) -> Result<()> {
        if vectors.len() != chunks.len() {
            return Err(RagError::BatchLengthMismatch {
                vectors: vectors.len(),
                chunks: chunks.len(),
            });
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        Ok(())
    }

    /// 배치 추가
    ///
    /// 전체 배치를 먼저 검증하므로 실패 시 저장소는 그대로입니다.
    /// 추가된 슬롯 범위를 반환합니다.
    pub fn append(&mut self, vectors: &[Vec<f32>], chunks: &[Chunk]) -> Result<Range<usize>> {
        self.validate_batch(vectors, chunks)?;

        let start = self.chunks.len();
        self.vectors.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.vectors.extend_from_slice(vector);
        }
        self.chunks.extend_from_slice(chunks);

        Ok(start..self.chunks.len())
    }

    pub fn embedding(&self, slot: usize) -> Option<&[f32]> {
        if slot >= self.chunks.len() {
            return None;
        }
        let offset = slot * self.dimension;
        Some(&self.vectors[offset..offset + self.dimension])
    }

    pub fn chunk(&self, slot: usize) -> Option<&Chunk> {
        self.chunks.get(slot)
    }

    pub fn entry(&self, slot: usize) -> Option<IndexedEntry<'_>> {
        Some(IndexedEntry {
            slot,
            chunk: self.chunk(slot)?,
            embedding: self.embedding(slot)?,
        })
    }

    /// 슬롯 순서대로 순회
    pub fn entries(&self) -> impl Iterator<Item = IndexedEntry<'_>> {
        self.chunks
            .iter()
            .zip(self.vectors.chunks_exact(self.dimension.max(1)))
            .enumerate()
            .map(|(slot, (chunk, embedding))| IndexedEntry {
                slot,
                chunk,
                embedding,
            })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }
}
