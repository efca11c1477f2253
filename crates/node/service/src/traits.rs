//! Contracts against the driver's external collaborators.
//!
//! Implementations live outside the driver core: the node binary wires real
//! clients, tests wire mocks.

use async_trait::async_trait;
use cp_protocol::{
    ExecutionPayloadEnvelope, L1BlockRef, L2BlockRef, PayloadAttributes,
};

/// Read access to the local chain, shared with the RPC server.
#[async_trait]
pub trait L2Chain: Send + Sync + core::fmt::Debug {
    /// Reads the block reference at a number.
    async fn l2_block_ref_by_number(&self, number: u64) -> Result<L2BlockRef, L2ChainError>;

    /// Reads the latest block reference.
    async fn latest_block_ref(&self) -> Result<L2BlockRef, L2ChainError>;
}

/// An error from a local-chain read.
#[derive(Debug, thiserror::Error)]
pub enum L2ChainError {
    /// The block does not exist.
    #[error("L2 block {0} not found")]
    NotFound(u64),
    /// The underlying transport failed.
    #[error("L2 RPC error: {0}")]
    Rpc(String),
}

/// The execution-layer peer client used to batch-sync payloads in EL-sync
/// mode.
#[async_trait]
pub trait ELSyncClient: Send + Sync + core::fmt::Debug {
    /// Reads the latest block reference of the peer client.
    async fn latest_block_ref(&self) -> Result<L2BlockRef, L2ChainError>;

    /// Fetches execution payloads for the inclusive block range
    /// `[start, end]`.
    async fn payloads_by_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<ExecutionPayloadEnvelope>, L2ChainError>;
}

/// An out-of-band mechanism to fetch missing unsafe payloads.
///
/// The request is only a hint: results come back through the driver's unsafe
/// payload channel, and the latest requested range takes priority over
/// previous ones.
#[async_trait]
pub trait AltSync: Send + Sync + core::fmt::Debug {
    /// Requests the open range `(start, end)`. `start` is the head already
    /// held; `end`, when present, is the first queued block. An absent end
    /// leaves the range open for the sync source to bound.
    async fn request_l2_range(
        &self,
        start: L2BlockRef,
        end: Option<L2BlockRef>,
    ) -> Result<(), AltSyncError>;
}

/// An error scheduling an alt-sync request.
#[derive(Debug, thiserror::Error)]
#[error("alt-sync request failed: {0}")]
pub struct AltSyncError(pub String);

/// The gossip publisher for sequenced payloads. Signing happens inside the
/// network layer.
#[async_trait]
pub trait Network: Send + Sync + core::fmt::Debug {
    /// Signs and publishes a payload, synchronously with the driver loop.
    async fn publish_l2_payload(
        &self,
        envelope: &ExecutionPayloadEnvelope,
    ) -> Result<(), NetworkError>;
}

/// An error publishing a payload.
#[derive(Debug, thiserror::Error)]
#[error("payload publish failed: {0}")]
pub struct NetworkError(pub String);

/// Builds payload attributes for the sequencer.
#[async_trait]
pub trait AttributesBuilder: Send + Sync + core::fmt::Debug {
    /// Prepares attributes for the block extending `parent` on `origin`.
    async fn prepare_payload_attributes(
        &self,
        parent: L2BlockRef,
        origin: L1BlockRef,
    ) -> Result<PayloadAttributes, AttributesBuilderError>;
}

/// An error preparing payload attributes.
#[derive(Debug, thiserror::Error)]
pub enum AttributesBuilderError {
    /// Transient; retry on the next action.
    #[error("temporary attributes error: {0}")]
    Temporary(String),
    /// Derivation state is inconsistent; the driver must reset.
    #[error("attributes require reset: {0}")]
    Reset(String),
    /// Unrecoverable.
    #[error("critical attributes error: {0}")]
    Critical(String),
}

/// Selects the base-layer origin for the next sequenced block.
#[async_trait]
pub trait L1OriginSelector: Send + Sync + core::fmt::Debug {
    /// The origin for the block extending `parent`. In recover mode the
    /// selector must return exactly the next base-layer block.
    async fn next_l1_origin(
        &self,
        parent: L2BlockRef,
        recover_mode: bool,
    ) -> Result<L1BlockRef, OriginSelectorError>;
}

/// An error selecting the next origin. Always retriable.
#[derive(Debug, thiserror::Error)]
#[error("origin selection failed: {0}")]
pub struct OriginSelectorError(pub String);

/// Persists whether the sequencer is running, so a restart resumes in the
/// same state.
#[async_trait]
pub trait SequencerStateListener: Send + Sync + core::fmt::Debug {
    /// Records that the sequencer started.
    async fn sequencer_started(&self) -> Result<(), SequencerStateListenerError>;

    /// Records that the sequencer stopped.
    async fn sequencer_stopped(&self) -> Result<(), SequencerStateListenerError>;
}

/// An error persisting sequencer state.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist sequencer state: {0}")]
pub struct SequencerStateListenerError(pub String);

/// A state listener that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSequencerStateListener;

#[async_trait]
impl SequencerStateListener for NoopSequencerStateListener {
    async fn sequencer_started(&self) -> Result<(), SequencerStateListenerError> {
        Ok(())
    }

    async fn sequencer_stopped(&self) -> Result<(), SequencerStateListenerError> {
        Ok(())
    }
}
