//! Engine error types and their severity classification.

use crate::L1ChainError;
use alloy_transport::{RpcError, TransportErrorKind};
use cp_protocol::{BlockId, BlockRefError};
use derive_more::Display;

/// The severity of an engine error, deciding how the driver reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EngineErrorSeverity {
    /// Transient failure against the engine; back off and retry.
    #[display("temporary-engine")]
    TemporaryEngine,
    /// Transient failure against the base layer; back off and retry.
    #[display("temporary-l1")]
    TemporaryL1,
    /// The payload itself was rejected; drop it without resetting.
    #[display("invalid-payload")]
    InvalidPayload,
    /// The engine view and derivation disagree; a reset is required.
    #[display("reset")]
    Reset,
    /// The driver cannot continue.
    #[display("critical")]
    Critical,
}

/// An error from the [`crate::EngineClient`].
#[derive(Debug, thiserror::Error)]
pub enum EngineClientError {
    /// The RPC transport failed.
    #[error("engine RPC error: {0}")]
    Rpc(#[from] RpcError<TransportErrorKind>),
    /// The call exceeded its deadline.
    #[error("engine call timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// A requested block does not exist on the engine.
    #[error("engine block not found: {0}")]
    BlockNotFound(String),
    /// A block could not be turned into a block reference.
    #[error(transparent)]
    BlockRef(#[from] BlockRefError),
}

/// An error from the [`crate::EngineController`].
#[derive(Debug, thiserror::Error)]
pub enum EngineControllerError {
    /// The engine client failed.
    #[error(transparent)]
    Client(#[from] EngineClientError),
    /// The base-layer reader failed during reset-target computation.
    #[error(transparent)]
    L1(#[from] L1ChainError),
    /// The engine reported `SYNCING` where `VALID` was expected.
    #[error("execution engine is syncing")]
    EngineSyncing,
    /// The engine rejected a payload as `INVALID`.
    #[error("engine rejected payload {0} as invalid")]
    InvalidPayload(BlockId),
    /// The engine rejected the forkchoice state itself.
    #[error("engine rejected forkchoice update: {0}")]
    InvalidForkchoice(String),
    /// The engine rejected payload attributes.
    #[error("engine rejected payload attributes for block {number}")]
    InvalidAttributes {
        /// The number of the block the attributes described.
        number: u64,
        /// Whether the attributes were produced by derivation.
        derived: bool,
    },
    /// A payload could not be converted into a block reference.
    #[error(transparent)]
    BlockRef(#[from] BlockRefError),
    /// The engine accepted a build job but returned no payload id.
    #[error("engine returned no payload id for build job")]
    MissingPayloadId,
}

impl EngineControllerError {
    /// Classifies the error into the driver's event taxonomy.
    pub const fn severity(&self) -> EngineErrorSeverity {
        match self {
            Self::Client(_) | Self::EngineSyncing | Self::MissingPayloadId => {
                EngineErrorSeverity::TemporaryEngine
            }
            Self::L1(_) => EngineErrorSeverity::TemporaryL1,
            Self::InvalidPayload(_) | Self::BlockRef(_) => EngineErrorSeverity::InvalidPayload,
            Self::InvalidForkchoice(_) => EngineErrorSeverity::Reset,
            Self::InvalidAttributes { derived, .. } => {
                if *derived {
                    EngineErrorSeverity::Reset
                } else {
                    EngineErrorSeverity::TemporaryEngine
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert_eq!(
            EngineControllerError::EngineSyncing.severity(),
            EngineErrorSeverity::TemporaryEngine
        );
        assert_eq!(
            EngineControllerError::L1(L1ChainError::NotFound(1)).severity(),
            EngineErrorSeverity::TemporaryL1
        );
        assert_eq!(
            EngineControllerError::InvalidPayload(BlockId::default()).severity(),
            EngineErrorSeverity::InvalidPayload
        );
        assert_eq!(
            EngineControllerError::InvalidForkchoice("bad".into()).severity(),
            EngineErrorSeverity::Reset
        );
        assert_eq!(
            EngineControllerError::InvalidAttributes { number: 5, derived: true }.severity(),
            EngineErrorSeverity::Reset
        );
        assert_eq!(
            EngineControllerError::InvalidAttributes { number: 5, derived: false }.severity(),
            EngineErrorSeverity::TemporaryEngine
        );
    }
}
