//! In-process vector store with an optional JSON snapshot on disk.
//!
//! Writers serialise on an advisory lock (`<snapshot>.lock`), re-read the
//! snapshot under that lock, merge their batch and replace the file through a
//! temporary file and a rename. Readers reload the snapshot whenever its size or
//! modification time changed, so several processes can share one snapshot.

use crate::error::IndexError;
use crate::models::{DocumentFilter, SearchHit, StoredChunk};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;
use uuid::Uuid;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct Snapshot {
    version: u32,
    chunks: Vec<StoredChunk>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    chunks: &'a [StoredChunk],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SnapshotStamp {
    modified: SystemTime,
    len: u64,
}

#[derive(Debug, Default)]
struct State {
    chunks: Vec<StoredChunk>,
    /// Stamp of the snapshot `chunks` was loaded from or last written to.
    stamp: Option<SnapshotStamp>,
}

/// Held for the whole read-merge-write cycle; dropping it releases the lock.
struct SnapshotLock(File);

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

#[derive(Debug, Default)]
pub struct LocalVectorStore {
    snapshot_path: Option<PathBuf>,
    state: RwLock<State>,
}

impl LocalVectorStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the snapshot at `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let (chunks, stamp) = read_snapshot(&path).await?;

        debug!(path = %path.display(), chunks = chunks.len(), "opened local vector store");

        Ok(Self {
            snapshot_path: Some(path),
            state: RwLock::new(State { chunks, stamp }),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Chunks held by this handle as of its last read or write.
    pub async fn len(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.chunks.is_empty()
    }

    /// Vector size of the stored chunks, `None` while the store is empty.
    pub async fn dimensions(&self) -> Result<Option<usize>, IndexError> {
        let state = self.current().await?;
        Ok(state.chunks.first().map(|chunk| chunk.embedding.len()))
    }

    /// Current view, reloaded first when another handle replaced the snapshot.
    async fn current(&self) -> Result<RwLockReadGuard<'_, State>, IndexError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(self.state.read().await);
        };

        let on_disk = snapshot_stamp(path).await?;
        {
            let state = self.state.read().await;
            if state.stamp == on_disk {
                return Ok(state);
            }
        }

        let mut state = self.state.write().await;
        if state.stamp != on_disk {
            let (chunks, stamp) = read_snapshot(path).await?;
            debug!(path = %path.display(), chunks = chunks.len(), "reloaded local vector store");
            state.chunks = chunks;
            state.stamp = stamp;
        }
        Ok(state.downgrade())
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

async fn ensure_parent(path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

async fn lock_snapshot(path: &Path) -> Result<SnapshotLock, IndexError> {
    ensure_parent(path).await?;
    let lock = lock_path(path);

    let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock)?;
        file.lock_exclusive()?;
        Ok(file)
    })
    .await
    .map_err(std::io::Error::other)??;

    Ok(SnapshotLock(file))
}

async fn snapshot_stamp(path: &Path) -> Result<Option<SnapshotStamp>, IndexError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(SnapshotStamp {
            modified: metadata.modified()?,
            len: metadata.len(),
        })),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(IndexError::Io(error)),
    }
}

/// Stamps before reading, so a concurrent replacement shows up as a stale stamp.
async fn read_snapshot(
    path: &Path,
) -> Result<(Vec<StoredChunk>, Option<SnapshotStamp>), IndexError> {
    let stamp = snapshot_stamp(path).await?;

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Vec::new(), None));
        }
        Err(error) => return Err(IndexError::Io(error)),
    };

    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(IndexError::NotReady(format!(
            "snapshot {} has version {}, expected {SNAPSHOT_VERSION}",
            path.display(),
            snapshot.version
        )));
    }
    Ok((snapshot.chunks, stamp))
}

/// Caller must hold the [`SnapshotLock`].
async fn write_snapshot(
    path: &Path,
    chunks: &[StoredChunk],
) -> Result<Option<SnapshotStamp>, IndexError> {
    let bytes = serde_json::to_vec(&SnapshotRef {
        version: SNAPSHOT_VERSION,
        chunks,
    })?;

    let mut temporary = path.as_os_str().to_owned();
    temporary.push(".tmp");
    let temporary = PathBuf::from(temporary);

    tokio::fs::write(&temporary, &bytes).await?;
    tokio::fs::rename(&temporary, path).await?;

    snapshot_stamp(path).await
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f64::from(dot / (norm_a * norm_b))
}

fn merge_points(
    mut staged: Vec<StoredChunk>,
    points: &[StoredChunk],
) -> Result<Vec<StoredChunk>, IndexError> {
    let dimension = staged
        .first()
        .map(|entry| entry.embedding.len())
        .unwrap_or(points[0].embedding.len());
    if let Some(point) = points.iter().find(|point| point.embedding.len() != dimension) {
        return Err(IndexError::Request(format!(
            "embedding dimension {} != {dimension} for chunk {} of {}",
            point.embedding.len(),
            point.metadata.chunk_index,
            point.metadata.document_id
        )));
    }

    let mut positions: HashMap<Uuid, usize> = staged
        .iter()
        .enumerate()
        .map(|(position, entry)| (entry.point_id, position))
        .collect();

    for point in points {
        match positions.get(&point.point_id) {
            Some(&position) => staged[position] = point.clone(),
            None => {
                positions.insert(point.point_id, staged.len());
                staged.push(point.clone());
            }
        }
    }
    Ok(staged)
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    fn backend(&self) -> &str {
        "local"
    }

    async fn upsert(&self, points: &[StoredChunk]) -> Result<(), IndexError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;

        let Some(path) = &self.snapshot_path else {
            state.chunks = merge_points(state.chunks.clone(), points)?;
            debug!(points = points.len(), total = state.chunks.len(), "local upsert");
            return Ok(());
        };

        let _lock = lock_snapshot(path).await?;
        let (on_disk, _) = read_snapshot(path).await?;
        let staged = merge_points(on_disk, points)?;
        let stamp = write_snapshot(path, &staged).await?;

        state.chunks = staged;
        state.stamp = stamp;
        debug!(points = points.len(), total = state.chunks.len(), "local upsert");
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        filter: &DocumentFilter,
        k: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let state = self.current().await?;

        if let Some(stored) = state.chunks.first() {
            if stored.embedding.len() != query_vector.len() {
                return Err(IndexError::Request(format!(
                    "query vector dim {} is not {}",
                    query_vector.len(),
                    stored.embedding.len()
                )));
            }
        }

        let mut scored: Vec<(f64, &StoredChunk)> = state
            .chunks
            .iter()
            .filter(|entry| filter.matches(&entry.metadata))
            .map(|entry| (cosine_similarity(&entry.embedding, query_vector), entry))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| SearchHit {
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
                score,
            })
            .collect())
    }

    async fn count(&self, filter: &DocumentFilter) -> Result<usize, IndexError> {
        let state = self.current().await?;
        Ok(state
            .chunks
            .iter()
            .filter(|entry| filter.matches(&entry.metadata))
            .count())
    }
}
