//! The subset of the rollup configuration consumed by the driver.

use crate::BlockId;
use serde::{Deserialize, Serialize};

/// The genesis anchor of the rollup: the L1 block the chain starts deriving
/// from, and the L2 genesis block itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupGenesis {
    /// The L1 block the rollup starts from.
    pub l1: BlockId,
    /// The L2 genesis block.
    pub l2: BlockId,
    /// The timestamp of the L2 genesis block.
    pub l2_time: u64,
}

/// Rollup chain parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupConfig {
    /// The genesis anchor.
    pub genesis: RollupGenesis,
    /// The block time of the L2 chain, in seconds.
    pub block_time: u64,
    /// The maximum distance, in seconds, an L2 block timestamp may drift past
    /// its L1 origin timestamp before the sequencer must produce empty blocks.
    pub max_sequencer_drift: u64,
}

impl RollupConfig {
    /// Whether the given block id is the L2 genesis block.
    pub fn is_l2_genesis(&self, id: BlockId) -> bool {
        id == self.genesis.l2
    }

    /// The [`crate::L2BlockRef`] of the L2 genesis block.
    pub fn genesis_l2_ref(&self) -> crate::L2BlockRef {
        crate::L2BlockRef {
            hash: self.genesis.l2.hash,
            number: self.genesis.l2.number,
            parent_hash: alloy_primitives::B256::ZERO,
            timestamp: self.genesis.l2_time,
            l1_origin: self.genesis.l1,
            sequence_number: 0,
        }
    }
}
