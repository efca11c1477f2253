//! The safe-head journal entry and its binary codec.
//!
//! The safe-head store is an append-only log of fixed-width records, each
//! binding a safe L2 block to the L1 block that completed its derivation.

use crate::BlockId;
use alloy_primitives::B256;

/// The encoded size of a [`SafeHeadEntry`]: two `(u64, B256)` pairs.
pub const SAFE_HEAD_ENTRY_SIZE: usize = 2 * (8 + 32);

/// A single safe-head journal record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafeHeadEntry {
    /// The safe L2 block.
    pub safe_head: BlockId,
    /// The L1 block whose data completed derivation of `safe_head`.
    pub derived_from: BlockId,
}

impl SafeHeadEntry {
    /// Encodes the entry as a fixed-width record.
    pub fn encode(&self) -> [u8; SAFE_HEAD_ENTRY_SIZE] {
        let mut out = [0u8; SAFE_HEAD_ENTRY_SIZE];
        out[..8].copy_from_slice(&self.safe_head.number.to_be_bytes());
        out[8..40].copy_from_slice(self.safe_head.hash.as_slice());
        out[40..48].copy_from_slice(&self.derived_from.number.to_be_bytes());
        out[48..80].copy_from_slice(self.derived_from.hash.as_slice());
        out
    }

    /// Decodes a fixed-width record. The input must be exactly
    /// [`SAFE_HEAD_ENTRY_SIZE`] bytes.
    pub fn decode(data: &[u8]) -> Result<Self, SafeHeadCodecError> {
        if data.len() != SAFE_HEAD_ENTRY_SIZE {
            return Err(SafeHeadCodecError::InvalidLength { got: data.len() });
        }
        Ok(Self {
            safe_head: BlockId {
                number: u64::from_be_bytes(data[..8].try_into().expect("8 bytes")),
                hash: B256::from_slice(&data[8..40]),
            },
            derived_from: BlockId {
                number: u64::from_be_bytes(data[40..48].try_into().expect("8 bytes")),
                hash: B256::from_slice(&data[48..80]),
            },
        })
    }
}

/// An error decoding a safe-head record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SafeHeadCodecError {
    /// The record has the wrong length.
    #[error("safe-head record has length {got}, expected {SAFE_HEAD_ENTRY_SIZE}")]
    InvalidLength {
        /// The length found.
        got: usize,
    },
}
