//! World store: blocks, chunk versions and the camera record on top of a
//! [`KvStore`] backend.
//!
//! The store is the single writer of persisted world data. It is passed to
//! services as an `Arc<WorldStore>`; nothing reaches it through globals.
//!
//! Reads that hit a malformed record panic: a block key whose chunk part
//! disagrees with its coordinate means the file is corrupt and serving
//! anything from it would be wrong.

use crate::codec;
use crate::kv::{Bucket, KvStore, MemoryKv, RedbKv, StoreError, Transaction};
use crate::types::{Camera, ChunkId, Vec3};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct WorldStore {
    kv: Arc<dyn KvStore>,
    versions: VersionClock,
}

impl WorldStore {
    /// Open the durable store at `path`, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::with_backend(Arc::new(RedbKv::open(path)?)))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryKv::new()))
    }

    pub fn with_backend(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            versions: VersionClock::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Set the block at `block` to type `w`. The chunk is derived from the
    /// coordinate.
    pub fn update_block(&self, block: Vec3, w: i32) -> Result<(), StoreError> {
        log::debug!("put {} -> {}", block, w);
        self.kv.commit(Transaction::new().put(
            Bucket::Block,
            codec::encode_block_key(block),
            codec::encode_block_value(w),
        ))
    }

    /// Set a block and stamp chunk versions in one commit, so a reader
    /// never sees the block without its new version or the other way round.
    pub fn apply_edit(
        &self,
        block: Vec3,
        w: i32,
        versions: &[(ChunkId, &str)],
    ) -> Result<(), StoreError> {
        log::debug!("put {} -> {} stamping {} chunks", block, w, versions.len());
        let mut tx = Transaction::new().put(
            Bucket::Block,
            codec::encode_block_key(block),
            codec::encode_block_value(w),
        );
        for (chunk, version) in versions {
            tx = tx.put(
                Bucket::Chunk,
                codec::encode_chunk_key(*chunk),
                version.as_bytes().to_vec(),
            );
        }
        self.kv.commit(tx)
    }

    pub fn get_block(&self, block: Vec3) -> Result<Option<i32>, StoreError> {
        self.kv
            .get(Bucket::Block, &codec::encode_block_key(block))?
            .map(|v| Ok(decode_or_panic(codec::decode_block_value(&v))))
            .transpose()
    }

    /// Visit every stored block of `chunk` in key order.
    ///
    /// # Panics
    ///
    /// If a stored key or value is malformed.
    pub fn range_blocks(
        &self,
        chunk: ChunkId,
        mut f: impl FnMut(Vec3, i32),
    ) -> Result<(), StoreError> {
        for (key, value) in self
            .kv
            .scan_prefix(Bucket::Block, &codec::chunk_prefix(chunk))?
        {
            let (stored, block) = decode_or_panic(codec::decode_block_key(&key));
            if stored != chunk {
                break;
            }
            f(block, decode_or_panic(codec::decode_block_value(&value)));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chunk versions
    // -----------------------------------------------------------------------

    /// Current version token of `chunk`; empty if it was never written.
    pub fn chunk_version(&self, chunk: ChunkId) -> Result<String, StoreError> {
        Ok(self
            .kv
            .get(Bucket::Chunk, &codec::encode_chunk_key(chunk))?
            .map(|v| decode_or_panic(codec::decode_version(&v)))
            .unwrap_or_default())
    }

    pub fn update_chunk_version(&self, chunk: ChunkId, version: &str) -> Result<(), StoreError> {
        self.kv.commit(Transaction::new().put(
            Bucket::Chunk,
            codec::encode_chunk_key(chunk),
            version.as_bytes().to_vec(),
        ))
    }

    /// A version token for `chunk` that differs from every token it has
    /// carried before, including ones persisted by earlier runs.
    pub fn next_chunk_version(&self, chunk: ChunkId) -> Result<String, StoreError> {
        let current = self.chunk_version(chunk)?;
        let floor = u64::from_str_radix(&current, 16).unwrap_or(0);
        Ok(format!("{:x}", self.versions.next_after(floor)))
    }

    // -----------------------------------------------------------------------
    // Camera
    // -----------------------------------------------------------------------

    pub fn update_camera(&self, camera: &Camera) -> Result<(), StoreError> {
        self.kv.commit(Transaction::new().put(
            Bucket::Camera,
            codec::CAMERA_KEY.to_vec(),
            codec::encode_camera(camera),
        ))
    }

    /// The persisted camera, or [`Camera::default`] if none was saved.
    pub fn camera(&self) -> Result<Camera, StoreError> {
        Ok(self
            .kv
            .get(Bucket::Camera, codec::CAMERA_KEY)?
            .map(|v| decode_or_panic(codec::decode_camera(&v)))
            .unwrap_or_default())
    }

    /// Flush everything to stable storage.
    pub fn close(&self) -> Result<(), StoreError> {
        self.kv.sync()
    }
}

fn decode_or_panic<T>(result: Result<T, codec::CodecError>) -> T {
    result.unwrap_or_else(|e| panic!("world store is corrupt: {e}"))
}

// ---------------------------------------------------------------------------
// Version clock
// ---------------------------------------------------------------------------

/// Nanosecond wall clock forced to be strictly increasing.
///
/// Two calls inside the same clock tick still get distinct values.
#[derive(Default)]
struct VersionClock {
    last: Mutex<u64>,
}

impl VersionClock {
    fn next_after(&self, floor: u64) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let mut last = self.last.lock();
        let next = now.max(last.saturating_add(1)).max(floor.saturating_add(1));
        *last = next;
        next
    }
}
