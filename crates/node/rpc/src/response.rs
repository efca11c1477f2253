//! Response types for the rollup node API.

use cp_protocol::{L2BlockRef, SyncStatus};
use serde::{Deserialize, Serialize};

/// A block reference paired with the sync status it is consistent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRefWithStatusResponse {
    /// The requested block reference.
    pub block_ref: L2BlockRef,
    /// The sync status observed with the block read.
    pub sync_status: SyncStatus,
}
