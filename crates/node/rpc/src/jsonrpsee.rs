//! The node's RPC API surfaces, defined with `jsonrpsee` proc macros.

pub use jsonrpsee::core::RpcResult;

use crate::BlockRefWithStatusResponse;
use alloy_primitives::B256;
use cp_protocol::SyncStatus;
use jsonrpsee::proc_macros::rpc;

/// Admin API for controlling the sequencer and the derivation pipeline.
#[rpc(server, namespace = "admin")]
pub trait AdminApi {
    /// Starts the sequencer on top of the given parent hash. A zero hash
    /// starts on the current unsafe head.
    #[method(name = "startSequencer")]
    async fn start_sequencer(&self, parent_hash: B256) -> RpcResult<()>;

    /// Stops the sequencer and returns the last sequenced head.
    #[method(name = "stopSequencer")]
    async fn stop_sequencer(&self) -> RpcResult<B256>;

    /// Whether the sequencer is actively building blocks.
    #[method(name = "sequencerActive")]
    async fn sequencer_active(&self) -> RpcResult<bool>;

    /// Overrides the conductor's leadership view.
    #[method(name = "overrideLeader")]
    async fn override_leader(&self) -> RpcResult<()>;

    /// Whether an external conductor is configured.
    #[method(name = "conductorEnabled")]
    async fn conductor_enabled(&self) -> RpcResult<bool>;

    /// Sets the sequencer recover mode.
    #[method(name = "setRecoverMode")]
    async fn set_recover_mode(&self, mode: bool) -> RpcResult<()>;

    /// Forces a reset of the derivation pipeline, returning once the reset
    /// has been scheduled on the driver.
    #[method(name = "resetDerivationPipeline")]
    async fn reset_derivation_pipeline(&self) -> RpcResult<()>;
}

/// Rollup node API serving sync-status snapshots.
#[rpc(server, namespace = "cp")]
pub trait RollupNodeApi {
    /// The node's current sync status.
    #[method(name = "syncStatus")]
    async fn sync_status(&self) -> RpcResult<SyncStatus>;

    /// A block reference by number, consistent with the returned sync status.
    #[method(name = "blockRefWithStatus")]
    async fn block_ref_with_status(&self, number: u64) -> RpcResult<BlockRefWithStatusResponse>;
}
