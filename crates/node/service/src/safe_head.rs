//! Safe-head persistence: an append-only journal of derivation progress.

use async_trait::async_trait;
use cp_protocol::{BlockId, L2BlockRef, SafeHeadEntry, SAFE_HEAD_ENTRY_SIZE};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
};

/// Notified when the safe head advances or resets.
///
/// Writes must be durable when the call returns: the driver confirms a
/// pipeline reset only after the reset record landed.
#[async_trait]
pub trait SafeHeadListener: Send + core::fmt::Debug {
    /// Whether updates are recorded at all.
    fn enabled(&self) -> bool;

    /// Records a new safe head and the base-layer block that completed its
    /// derivation.
    async fn safe_head_updated(
        &mut self,
        safe_head: BlockId,
        derived_from: BlockId,
    ) -> Result<(), SafeHeadStoreError>;

    /// Records a derivation reset rolling the safe head back to `safe_head`.
    async fn safe_head_reset(&mut self, safe_head: L2BlockRef)
        -> Result<(), SafeHeadStoreError>;
}

/// An error from the safe-head store.
#[derive(Debug, thiserror::Error)]
pub enum SafeHeadStoreError {
    /// The journal file could not be written.
    #[error("safe-head journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The journal holds a record of unexpected size.
    #[error("safe-head journal is corrupt at offset {offset}")]
    Corrupt {
        /// The byte offset of the bad record.
        offset: u64,
    },
}

/// A listener for nodes running without a safe-head database.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSafeHeadListener;

#[async_trait]
impl SafeHeadListener for NoopSafeHeadListener {
    fn enabled(&self) -> bool {
        false
    }

    async fn safe_head_updated(
        &mut self,
        _safe_head: BlockId,
        _derived_from: BlockId,
    ) -> Result<(), SafeHeadStoreError> {
        Ok(())
    }

    async fn safe_head_reset(
        &mut self,
        _safe_head: L2BlockRef,
    ) -> Result<(), SafeHeadStoreError> {
        Ok(())
    }
}

/// An append-only file of fixed-width [`SafeHeadEntry`] records.
///
/// A reset is journaled as a marker record: the reset-to block paired with a
/// zero `derived_from`. Every append is synced to disk before returning.
#[derive(Debug)]
pub struct FileSafeHeadStore {
    path: PathBuf,
    file: File,
}

impl FileSafeHeadStore {
    /// Opens (or creates) the journal at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SafeHeadStoreError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// The journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, entry: &SafeHeadEntry) -> Result<(), SafeHeadStoreError> {
        self.file.write_all(&entry.encode())?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Reads the whole journal back, in append order.
    pub fn replay(&self) -> Result<Vec<SafeHeadEntry>, SafeHeadStoreError> {
        let mut raw = Vec::new();
        let mut reader = File::open(&self.path)?;
        reader.read_to_end(&mut raw)?;

        let mut entries = Vec::with_capacity(raw.len() / SAFE_HEAD_ENTRY_SIZE);
        for (idx, chunk) in raw.chunks(SAFE_HEAD_ENTRY_SIZE).enumerate() {
            let entry = SafeHeadEntry::decode(chunk).map_err(|_| SafeHeadStoreError::Corrupt {
                offset: (idx * SAFE_HEAD_ENTRY_SIZE) as u64,
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[async_trait]
impl SafeHeadListener for FileSafeHeadStore {
    fn enabled(&self) -> bool {
        true
    }

    async fn safe_head_updated(
        &mut self,
        safe_head: BlockId,
        derived_from: BlockId,
    ) -> Result<(), SafeHeadStoreError> {
        debug!(target: "safedb", safe = %safe_head, l1 = %derived_from, "Recording safe head");
        self.append(&SafeHeadEntry { safe_head, derived_from })
    }

    async fn safe_head_reset(
        &mut self,
        safe_head: L2BlockRef,
    ) -> Result<(), SafeHeadStoreError> {
        info!(target: "safedb", safe = %safe_head, "Recording safe-head reset");
        self.append(&SafeHeadEntry { safe_head: safe_head.id(), derived_from: BlockId::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use cp_protocol::test_utils::l2_block_ref;

    fn id(number: u64, byte: u8) -> BlockId {
        BlockId { hash: B256::repeat_byte(byte), number }
    }

    #[tokio::test]
    async fn test_journal_appends_and_replays() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSafeHeadStore::open(dir.path().join("safe_head_db")).unwrap();

        store.safe_head_updated(id(101, 1), id(995, 2)).await.unwrap();
        store.safe_head_updated(id(102, 3), id(996, 4)).await.unwrap();

        let entries = store.replay().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].safe_head, id(101, 1));
        assert_eq!(entries[1].derived_from, id(996, 4));
    }

    #[tokio::test]
    async fn test_reset_marker_precedes_new_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSafeHeadStore::open(dir.path().join("safe_head_db")).unwrap();

        store.safe_head_updated(id(150, 1), id(995, 2)).await.unwrap();
        store.safe_head_reset(l2_block_ref(148, 994)).await.unwrap();
        store.safe_head_updated(id(149, 5), id(995, 6)).await.unwrap();

        let entries = store.replay().unwrap();
        assert_eq!(entries.len(), 3);
        // The marker carries a zeroed derived-from pair.
        assert_eq!(entries[1].derived_from, BlockId::default());
        assert_eq!(entries[1].safe_head.number, 148);
    }

    #[tokio::test]
    async fn test_truncated_journal_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safe_head_db");
        let mut store = FileSafeHeadStore::open(&path).unwrap();
        store.safe_head_updated(id(1, 1), id(2, 2)).await.unwrap();

        // Chop the tail off the last record.
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 7]).unwrap();

        let store = FileSafeHeadStore::open(&path).unwrap();
        assert!(matches!(store.replay(), Err(SafeHeadStoreError::Corrupt { offset: 0 })));
    }

    #[tokio::test]
    async fn test_reopen_appends_after_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safe_head_db");
        {
            let mut store = FileSafeHeadStore::open(&path).unwrap();
            store.safe_head_updated(id(1, 1), id(2, 2)).await.unwrap();
        }
        let mut store = FileSafeHeadStore::open(&path).unwrap();
        store.safe_head_updated(id(3, 3), id(4, 4)).await.unwrap();
        assert_eq!(store.replay().unwrap().len(), 2);
    }
}
