//! The externally observable sync-status snapshot.

use crate::{L1BlockRef, L2BlockRef};
use serde::{Deserialize, Serialize};

/// A snapshot of the node's view of both chains.
///
/// Served over RPC; every field reflects all events processed strictly before
/// the snapshot was taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// The L1 head block.
    pub head_l1: L1BlockRef,
    /// The L1 safe (justified) block.
    pub safe_l1: L1BlockRef,
    /// The L1 finalized block.
    pub finalized_l1: L1BlockRef,
    /// The L2 unsafe head, as received from gossip or sequencing.
    pub unsafe_l2: L2BlockRef,
    /// The L2 head confirmed by derivation.
    pub safe_l2: L2BlockRef,
    /// The L2 head derived from a finalized L1 block.
    pub finalized_l2: L2BlockRef,
    /// The L2 head with attributes applied but not yet confirmed safe.
    pub pending_safe_l2: L2BlockRef,
    /// The L2 unsafe head validated by the cross-chain safety check.
    pub cross_unsafe_l2: L2BlockRef,
    /// The number of unsafe payloads queued ahead of the unsafe head.
    pub queued_unsafe_payloads: u64,
}
