//! Vector Index - 정확 최근접 이웃 검색 (제곱 L2 거리)
//!
//! FAISS `IndexFlatL2`와 같은 브루트포스 방식입니다.
//! 모든 슬롯과의 거리를 계산하므로 결과가 근사가 아닌 정확값입니다.
//!
//! 저장 형식 (두 파일이 한 쌍):
//! - 인덱스 파일: `RCVI` | version | dimension | count | pair_id(16B) | f32 LE * count * dimension
//! - 메타데이터 파일: JSON `{ pair_id, dimension, chunks: [...] }`
//!
//! pair_id가 다르면 짝이 맞지 않는 파일로 보고 로드를 거부합니다.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, Result};

use super::chunk::{Chunk, ScoreSource, ScoredChunk};
use super::chunk_store::ChunkStore;

/// 인덱스 파일 매직 바이트
const INDEX_MAGIC: &[u8; 4] = b"RCVI";
/// 인덱스 파일 포맷 버전
const INDEX_VERSION: u32 = 1;
/// 헤더 크기: magic(4) + version(4) + dimension(4) + count(8) + pair_id(16)
const HEADER_LEN: usize = 36;

// ============================================================================
// Utility Functions
// ============================================================================

/// 제곱 유클리드 거리
///
/// 길이가 다르면 짧은 쪽 기준으로 계산하므로 호출 전에 차원을 검증해야 합니다.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// (거리, 슬롯) 정렬: 거리 오름차순, 같으면 슬롯 순서
fn by_distance_then_slot(a: &(f32, usize), b: &(f32, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 메타데이터 파일 본문
#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    pair_id: String,
    dimension: usize,
    chunks: Vec<Chunk>,
}

/// 정확 L2 벡터 인덱스
///
/// 검색은 읽기 락, `add`/`load`는 쓰기 락을 사용합니다.
/// 동시 검색은 안전하고, 변경 중에는 검색이 끼어들지 않습니다.
pub struct VectorIndex {
    dimension: usize,
    state: RwLock<ChunkStore>,
}

impl VectorIndex {
    /// 빈 인덱스 생성
    ///
    /// # Arguments
    /// * `dimension` - 임베딩 차원 (0 불가, 인스턴스 수명 동안 고정)
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidConfig(
                "vector index dimension must be positive".to_string(),
            ));
        }

        Ok(Self {
            dimension,
            state: RwLock::new(ChunkStore::new(dimension)),
        })
    }

    /// 인덱스 파일 쌍에서 열기
    pub fn open(dimension: usize, index_path: &Path, metadata_path: &Path) -> Result<Self> {
        let index = Self::new(dimension)?;
        index.load(index_path, metadata_path)?;
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 현재 엔트리 수
    pub fn size(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// 저장된 청크 스냅샷 (슬롯 순서)
    ///
    /// 같은 코퍼스로 BM25 인덱스를 만들 때 사용합니다.
    pub fn chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self.read()?.chunks().to_vec())
    }

    /// 임베딩/청크 배치 추가
    ///
    /// 길이 또는 차원이 맞지 않으면 아무것도 바꾸지 않고 실패합니다.
    /// 영속화는 하지 않으므로 필요하면 `save`를 호출해야 합니다.
    ///
    /// # Returns
    /// 추가 후 엔트리 수
    pub fn add(&self, vectors: &[Vec<f32>], chunks: &[Chunk]) -> Result<usize> {
        let mut state = self.write()?;
        let range = state.append(vectors, chunks)?;

        tracing::debug!(
            "Added {} vectors to index (slots {}..{})",
            range.len(),
            range.start,
            range.end
        );

        Ok(state.len())
    }

    /// 최근접 k개 검색
    ///
    /// 제곱 L2 거리 오름차순. 엔트리가 k개 미만이면 전부, 비어 있으면 빈 결과.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let state = self.read()?;
        if k == 0 || state.is_empty() {
            return Ok(vec![]);
        }

        let mut scored: Vec<(f32, usize)> = state
            .entries()
            .map(|entry| (squared_l2(query, entry.embedding), entry.slot))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance_then_slot);
            scored.truncate(k);
        }
        scored.sort_by(by_distance_then_slot);

        let results = scored
            .into_iter()
            .filter_map(|(distance, slot)| {
                state
                    .chunk(slot)
                    .map(|chunk| ScoredChunk::new(distance, ScoreSource::Distance, chunk.clone()))
            })
            .collect();

        Ok(results)
    }

    /// 인덱스 + 메타데이터 저장
    ///
    /// 두 파일에 같은 pair_id를 기록합니다.
    /// 임시 파일에 쓴 뒤 rename하므로 중간 상태 파일이 남지 않습니다.
    pub fn save(&self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        let state = self.read()?;
        let pair_id = Uuid::new_v4();

        for path in [index_path, metadata_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        write_atomic(index_path, |writer| {
            writer.write_all(INDEX_MAGIC)?;
            writer.write_all(&INDEX_VERSION.to_le_bytes())?;
            writer.write_all(&(self.dimension as u32).to_le_bytes())?;
            writer.write_all(&(state.len() as u64).to_le_bytes())?;
            writer.write_all(pair_id.as_bytes())?;
            for value in state.raw_vectors() {
                writer.write_all(&value.to_le_bytes())?;
            }
            Ok(())
        })?;

        let metadata = MetadataFile {
            pair_id: pair_id.to_string(),
            dimension: self.dimension,
            chunks: state.chunks().to_vec(),
        };
        write_atomic(metadata_path, |writer| {
            serde_json::to_writer(&mut *writer, &metadata)?;
            Ok(())
        })?;

        tracing::info!(
            "Saved vector index ({} entries, dim={}) to {:?}",
            state.len(),
            self.dimension,
            index_path
        );

        Ok(())
    }

    /// 인덱스 + 메타데이터 로드
    ///
    /// 두 파일을 모두 읽고 검증한 뒤에만 상태를 교체합니다.
    /// 실패하면 기존 상태가 그대로 유지됩니다.
    pub fn load(&self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        for path in [index_path, metadata_path] {
            if !path.exists() {
                return Err(RagError::NotFound(path.to_path_buf()));
            }
        }

        let (dimension, pair_id, vectors) = read_index_file(index_path)?;
        let metadata: MetadataFile =
            serde_json::from_reader(BufReader::new(File::open(metadata_path)?))?;

        if dimension != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: dimension,
            });
        }

        if metadata.dimension != dimension || metadata.pair_id != pair_id.to_string() {
            return Err(RagError::PairMismatch(format!(
                "{:?} and {:?} were not saved together",
                index_path, metadata_path
            )));
        }

        let count = metadata.chunks.len();
        let store = ChunkStore::from_parts(dimension, vectors, metadata.chunks)
            .map_err(|e| RagError::PairMismatch(e.to_string()))?;

        *self.write()? = store;

        tracing::info!(
            "Loaded vector index ({} entries, dim={}) from {:?}",
            count,
            dimension,
            index_path
        );

        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, ChunkStore>> {
        self.state
            .read()
            .map_err(|e| RagError::Lock(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, ChunkStore>> {
        self.state
            .write()
            .map_err(|e| RagError::Lock(e.to_string()))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 임시 파일에 쓴 뒤 rename
fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp_path = tmp_sibling(path);
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        write(&mut writer)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// 인덱스 파일 파싱 → (dimension, pair_id, 평탄 벡터)
fn read_index_file(path: &Path) -> Result<(usize, Uuid, Vec<f32>)> {
    let file_len = std::fs::metadata(path)?.len();
    let mut reader = BufReader::new(File::open(path)?);

    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .map_err(|_| RagError::CorruptIndex(format!("{:?}: truncated header", path)))?;

    if &header[0..4] != INDEX_MAGIC {
        return Err(RagError::CorruptIndex(format!("{:?}: bad magic", path)));
    }

    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != INDEX_VERSION {
        return Err(RagError::CorruptIndex(format!(
            "{:?}: unsupported version {}",
            path, version
        )));
    }

    let dimension = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&header[20..36]);
    let pair_id = Uuid::from_bytes(id_bytes);

    let floats = count
        .checked_mul(dimension)
        .ok_or_else(|| RagError::CorruptIndex(format!("{:?}: size overflow", path)))?;
    let expected_len = HEADER_LEN as u64 + floats as u64 * 4;
    if file_len != expected_len {
        return Err(RagError::CorruptIndex(format!(
            "{:?}: expected {} bytes, found {}",
            path, expected_len, file_len
        )));
    }

    let mut vectors = Vec::with_capacity(floats);
    let mut buf = [0u8; 4];
    for _ in 0..floats {
        reader.read_exact(&mut buf)?;
        vectors.push(f32::from_le_bytes(buf));
    }

    Ok((dimension, pair_id, vectors))
}

// ============================================================================
// Tests
// ============================================================================
