//! Typed queries and errors for the admin API.

use alloy_primitives::B256;
use jsonrpsee::types::{ErrorCode, ErrorObjectOwned};
use tokio::sync::oneshot;

/// The queries the admin RPC forwards to the sequencer.
#[derive(Debug)]
pub enum SequencerAdminQuery {
    /// A query to check if the sequencer is active.
    SequencerActive(oneshot::Sender<bool>),
    /// A query to start the sequencer on top of the given parent.
    StartSequencer {
        /// The expected parent of the first sequenced block. A zero hash
        /// skips the check.
        parent_hash: B256,
        /// The responder.
        tx: oneshot::Sender<Result<(), SequencerAdminError>>,
    },
    /// A query to stop the sequencer, answering with the last sequenced head.
    StopSequencer(oneshot::Sender<Result<B256, SequencerAdminError>>),
    /// A query to check if an external conductor is configured.
    ConductorEnabled(oneshot::Sender<bool>),
    /// A query to set the recover mode.
    SetRecoverMode(bool),
    /// A query to override the conductor's leadership view.
    OverrideLeader,
}

/// Errors returned by sequencer admin operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SequencerAdminError {
    /// The sequencer is already running.
    #[error("sequencer already running")]
    AlreadyStarted,
    /// The sequencer is already stopped.
    #[error("sequencer not running")]
    AlreadyStopped,
    /// The node is not configured to sequence.
    #[error("sequencer is disabled")]
    Disabled,
    /// The requested parent does not match the current unsafe head.
    #[error("requested parent does not match the unsafe head")]
    HeadMismatch,
}

impl From<SequencerAdminError> for ErrorObjectOwned {
    fn from(err: SequencerAdminError) -> Self {
        match err {
            SequencerAdminError::Disabled => ErrorObjectOwned::from(ErrorCode::MethodNotFound),
            other => ErrorObjectOwned::owned(
                ErrorCode::InvalidRequest.code(),
                other.to_string(),
                None::<()>,
            ),
        }
    }
}

/// The node has shut down and can no longer answer queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, thiserror::Error)]
#[error("node is closed")]
pub struct NodeClosedError;

impl From<NodeClosedError> for ErrorObjectOwned {
    fn from(_: NodeClosedError) -> Self {
        ErrorObjectOwned::from(ErrorCode::InternalError)
    }
}
