//! Ordered transactional key/value backends for the world store.
//!
//! [`KvStore`] is the seam the world store is built on: named buckets of
//! byte keys, ordered prefix scans, and atomic multi-write commits.
//!
//! - [`MemoryKv`] keeps everything in `BTreeMap`s (tests, `--db ""`).
//! - [`RedbKv`] is the durable backend: one redb table per [`Bucket`], one
//!   redb write transaction per [`Transaction`]. Data lives on disk, not in
//!   memory, and redb reclaims overwritten pages itself.
//!
//! A file redb cannot validate fails [`RedbKv::open`] with
//! [`StoreError::Corrupt`]; it is never truncated or rebuilt.

use crate::codec::CodecError;
use parking_lot::RwLock;
use redb::{Database, TableDefinition};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("corrupt world file: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Db(redb::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<redb::Error> for StoreError {
    fn from(e: redb::Error) -> Self {
        match e {
            redb::Error::Corrupted(reason) => StoreError::Corrupt(reason),
            other => StoreError::Db(other),
        }
    }
}

fn db_error(e: impl Into<redb::Error>) -> StoreError {
    StoreError::from(e.into())
}

// ---------------------------------------------------------------------------
// Buckets & transactions
// ---------------------------------------------------------------------------

/// Independent key spaces.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Bucket {
    Block = 0,
    Chunk = 1,
    Camera = 2,
}

type RawTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Block, Bucket::Chunk, Bucket::Camera];

    pub fn name(self) -> &'static str {
        match self {
            Bucket::Block => "block",
            Bucket::Chunk => "chunk",
            Bucket::Camera => "camera",
        }
    }

    fn table(self) -> RawTable {
        TableDefinition::new(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Put {
        bucket: Bucket,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        bucket: Bucket,
        key: Vec<u8>,
    },
}

/// A batch of writes applied atomically by [`KvStore::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<Op>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, bucket: Bucket, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.ops.push(Op::Put {
            bucket,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(mut self, bucket: Bucket, key: impl Into<Vec<u8>>) -> Self {
        self.ops.push(Op::Delete {
            bucket,
            key: key.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Transactional key/value store with ordered iteration.
pub trait KvStore: Send + Sync {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries of `bucket` whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, bucket: Bucket, prefix: &[u8])
        -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Apply every op of `tx` or none of them.
    fn commit(&self, tx: Transaction) -> Result<(), StoreError>;

    /// Force committed data to stable storage.
    fn sync(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory tables
// ---------------------------------------------------------------------------

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
struct Tables {
    buckets: [Table; 3],
}

impl Tables {
    fn table(&self, bucket: Bucket) -> &Table {
        &self.buckets[bucket as usize]
    }

    fn apply(&mut self, tx: Transaction) {
        for op in tx.ops {
            match op {
                Op::Put { bucket, key, value } => {
                    self.buckets[bucket as usize].insert(key, value);
                }
                Op::Delete { bucket, key } => {
                    self.buckets[bucket as usize].remove(&key);
                }
            }
        }
    }

    fn scan_prefix(&self, bucket: Bucket, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.table(bucket)
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Volatile store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryKv {
    tables: RwLock<Tables>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.read().table(bucket).get(key).cloned())
    }

    fn scan_prefix(
        &self,
        bucket: Bucket,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self.tables.read().scan_prefix(bucket, prefix))
    }

    fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        self.tables.write().apply(tx);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// redb-backed store
// ---------------------------------------------------------------------------

/// Durable store in a single redb file. Every commit is durable on return.
pub struct RedbKv {
    path: PathBuf,
    db: Database,
}

impl RedbKv {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(db_error)?;

        // Read transactions only see tables that exist.
        let tx = db.begin_write().map_err(db_error)?;
        for bucket in Bucket::ALL {
            tx.open_table(bucket.table()).map_err(db_error)?;
        }
        tx.commit().map_err(db_error)?;

        log::info!("{}: world database open", path.display());
        Ok(Self { path, db })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for RedbKv {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let tx = self.db.begin_read().map_err(db_error)?;
        let table = tx.open_table(bucket.table()).map_err(db_error)?;
        let value = table.get(key).map_err(db_error)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn scan_prefix(
        &self,
        bucket: Bucket,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let tx = self.db.begin_read().map_err(db_error)?;
        let table = tx.open_table(bucket.table()).map_err(db_error)?;
        let mut entries = Vec::new();
        for entry in table.range(prefix..).map_err(db_error)? {
            let (key, value) = entry.map_err(db_error)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            entries.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(entries)
    }

    fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        if tx.is_empty() {
            return Ok(());
        }
        // Dropping `write` before `commit` aborts every op.
        let write = self.db.begin_write().map_err(db_error)?;
        for op in &tx.ops {
            match op {
                Op::Put { bucket, key, value } => {
                    let mut table = write.open_table(bucket.table()).map_err(db_error)?;
                    table
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(db_error)?;
                }
                Op::Delete { bucket, key } => {
                    let mut table = write.open_table(bucket.table()).map_err(db_error)?;
                    table.remove(key.as_slice()).map_err(db_error)?;
                }
            }
        }
        write.commit().map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_kv() -> (tempfile::TempDir, RedbKv) {
        let dir = tempfile::tempdir().unwrap();
        let kv = RedbKv::open(dir.path().join("world.redb")).unwrap();
        (dir, kv)
    }

    #[test]
    fn commit_applies_puts_and_deletes_together() {
        let (_dir, kv) = temp_kv();
        kv.commit(
            Transaction::new()
                .put(Bucket::Block, b"a1".to_vec(), b"x".to_vec())
                .put(Bucket::Chunk, b"a1".to_vec(), b"y".to_vec()),
        )
        .unwrap();
        kv.commit(Transaction::new().delete(Bucket::Block, b"a1".to_vec()))
            .unwrap();

        assert_eq!(kv.get(Bucket::Block, b"a1").unwrap(), None);
        assert_eq!(kv.get(Bucket::Chunk, b"a1").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn prefix_scan_stops_at_the_first_foreign_key() {
        let (_dir, kv) = temp_kv();
        kv.commit(
            Transaction::new()
                .put(Bucket::Block, b"ab1".to_vec(), b"1".to_vec())
                .put(Bucket::Block, b"ab2".to_vec(), b"2".to_vec())
                .put(Bucket::Block, b"ac1".to_vec(), b"3".to_vec())
                .put(Bucket::Block, b"aa9".to_vec(), b"4".to_vec()),
        )
        .unwrap();

        let keys: Vec<_> = kv
            .scan_prefix(Bucket::Block, b"ab")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"ab1".to_vec(), b"ab2".to_vec()]);
        assert!(kv.scan_prefix(Bucket::Camera, b"").unwrap().is_empty());
    }
}
