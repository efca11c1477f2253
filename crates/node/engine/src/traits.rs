//! Contracts against the execution layer and the base-layer chain reader.

use crate::EngineClientError;
use alloy_primitives::B256;
use alloy_rpc_types_engine::{
    ExecutionPayloadV3, ForkchoiceState, ForkchoiceUpdated, PayloadId, PayloadStatus,
};
use async_trait::async_trait;
use cp_protocol::{BlockLabel, ExecutionPayloadEnvelope, L1BlockRef, L2BlockRef, PayloadAttributes};

/// The Engine API surface the controller consumes.
///
/// Implemented by [`crate::EngineClient`] in production and by mocks in tests.
#[async_trait]
pub trait EngineApi: Send + Sync + core::fmt::Debug {
    /// Updates the engine's forkchoice, optionally starting a payload build
    /// job when `attrs` is provided.
    async fn forkchoice_update(
        &self,
        state: ForkchoiceState,
        attrs: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdated, EngineClientError>;

    /// Imports a payload into the engine.
    async fn new_payload(
        &self,
        envelope: &ExecutionPayloadEnvelope,
    ) -> Result<PayloadStatus, EngineClientError>;

    /// Fetches a sealed payload for a previously started build job.
    async fn get_payload(&self, id: PayloadId) -> Result<ExecutionPayloadV3, EngineClientError>;

    /// Reads the L2 block reference at a label.
    async fn l2_block_ref_by_label(
        &self,
        label: BlockLabel,
    ) -> Result<L2BlockRef, EngineClientError>;

    /// Reads the L2 block reference at a number.
    async fn l2_block_ref_by_number(&self, number: u64)
        -> Result<L2BlockRef, EngineClientError>;

    /// Reads the L2 block reference with the given hash.
    async fn l2_block_ref_by_hash(&self, hash: B256) -> Result<L2BlockRef, EngineClientError>;
}

/// The base-layer reads the controller needs when computing a reset target.
///
/// The full L1 chain reader lives outside the driver core; this is the only
/// slice of it the engine consumes.
#[async_trait]
pub trait L1Chain: Send + Sync + core::fmt::Debug {
    /// Reads the L1 block reference at a number.
    async fn l1_block_ref_by_number(&self, number: u64) -> Result<L1BlockRef, L1ChainError>;
}

/// An error from the base-layer chain reader.
#[derive(Debug, thiserror::Error)]
pub enum L1ChainError {
    /// The block does not exist (yet) on the reader's view.
    #[error("L1 block {0} not found")]
    NotFound(u64),
    /// The underlying transport failed.
    #[error("L1 RPC error: {0}")]
    Rpc(String),
}
