//! Block reference types for the base layer and the local chain.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// A `(hash, number)` pair identifying a block on either chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockId {
    /// The block hash.
    pub hash: B256,
    /// The block number.
    pub number: u64,
}

impl core::fmt::Display for BlockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.hash, self.number)
    }
}

/// A reference to an L1 block.
///
/// Equality is by hash; the number ordering is only ever used for diagnostics
/// and traversal, never to decide between two conflicting blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L1BlockRef {
    /// The block hash.
    pub hash: B256,
    /// The block number.
    pub number: u64,
    /// The parent block hash.
    pub parent_hash: B256,
    /// The block timestamp.
    pub timestamp: u64,
}

impl L1BlockRef {
    /// Returns the `(hash, number)` id of this block.
    pub const fn id(&self) -> BlockId {
        BlockId { hash: self.hash, number: self.number }
    }
}

impl core::fmt::Display for L1BlockRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.hash, self.number)
    }
}

/// A reference to a block on the local (L2) chain, including where on the base
/// layer it was derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L2BlockRef {
    /// The block hash.
    pub hash: B256,
    /// The block number.
    pub number: u64,
    /// The parent block hash.
    pub parent_hash: B256,
    /// The block timestamp.
    pub timestamp: u64,
    /// The L1 block this L2 block was derived from.
    pub l1_origin: BlockId,
    /// The distance of this block from the first L2 block that shares its L1
    /// origin.
    pub sequence_number: u64,
}

impl L2BlockRef {
    /// Returns the `(hash, number)` id of this block.
    pub const fn id(&self) -> BlockId {
        BlockId { hash: self.hash, number: self.number }
    }
}

impl core::fmt::Display for L2BlockRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.hash, self.number)
    }
}

/// Named block labels understood by the execution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockLabel {
    /// The latest block.
    Latest,
    /// The safe block.
    Safe,
    /// The finalized block.
    Finalized,
}

impl BlockLabel {
    /// The RPC string for this label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Safe => "safe",
            Self::Finalized => "finalized",
        }
    }
}

impl core::fmt::Display for BlockLabel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
