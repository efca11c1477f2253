//! Payload attributes: the inputs that define a candidate L2 block.

use crate::{L1BlockRef, L2BlockRef};
use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// The attributes handed to the engine to start a payload build job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttributes {
    /// The timestamp of the block to build.
    #[serde(with = "crate::quantity")]
    pub timestamp: u64,
    /// The randomness value carried over from the L1 origin.
    pub prev_randao: B256,
    /// The fee recipient of the block.
    pub suggested_fee_recipient: Address,
    /// The parent beacon block root, required after the beacon-root upgrade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<B256>,
    /// Transactions to force-include at the top of the block, deposits first.
    pub transactions: Vec<Bytes>,
    /// When true, the engine must not take transactions from its pool.
    pub no_tx_pool: bool,
    /// An explicit gas limit for the block, if the rollup overrides it.
    #[serde(with = "crate::quantity::opt", skip_serializing_if = "Option::is_none", default)]
    pub gas_limit: Option<u64>,
}

/// [`PayloadAttributes`] paired with the parent they extend and, for derived
/// attributes, the L1 block whose data produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributesWithParent {
    /// The payload attributes.
    pub attributes: PayloadAttributes,
    /// The parent block the attributes build on.
    pub parent: L2BlockRef,
    /// The L1 block the attributes were derived from. `None` for sequenced
    /// attributes, which are not derived.
    pub derived_from: Option<L1BlockRef>,
}

impl AttributesWithParent {
    /// The number of the block these attributes describe.
    pub const fn block_number(&self) -> u64 {
        self.parent.number + 1
    }

    /// Whether the attributes came out of the derivation pipeline.
    pub const fn is_derived(&self) -> bool {
        self.derived_from.is_some()
    }
}
