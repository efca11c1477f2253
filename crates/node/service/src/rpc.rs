//! RPC server implementations over the driver handle.

use crate::{DriverApiError, DriverHandle};
use alloy_primitives::B256;
use async_trait::async_trait;
use cp_protocol::SyncStatus;
use cp_rpc::{AdminApiServer, BlockRefWithStatusResponse, RollupNodeApiServer};
use jsonrpsee::{
    core::RpcResult,
    types::{ErrorCode, ErrorObjectOwned},
};

fn to_rpc_error(err: DriverApiError) -> ErrorObjectOwned {
    match err {
        DriverApiError::Sequencer(inner) => inner.into(),
        DriverApiError::Closed => ErrorObjectOwned::from(ErrorCode::InternalError),
        other => {
            ErrorObjectOwned::owned(ErrorCode::InternalError.code(), other.to_string(), None::<()>)
        }
    }
}

/// The admin RPC server, forwarding to the driver.
#[derive(Debug, Clone)]
pub struct AdminRpc {
    handle: DriverHandle,
}

impl AdminRpc {
    /// Creates the server over a driver handle.
    pub const fn new(handle: DriverHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl AdminApiServer for AdminRpc {
    async fn start_sequencer(&self, parent_hash: B256) -> RpcResult<()> {
        self.handle.start_sequencer(parent_hash).await.map_err(to_rpc_error)
    }

    async fn stop_sequencer(&self) -> RpcResult<B256> {
        self.handle.stop_sequencer().await.map_err(to_rpc_error)
    }

    async fn sequencer_active(&self) -> RpcResult<bool> {
        self.handle.sequencer_active().await.map_err(to_rpc_error)
    }

    async fn override_leader(&self) -> RpcResult<()> {
        self.handle.override_leader().await.map_err(to_rpc_error)
    }

    async fn conductor_enabled(&self) -> RpcResult<bool> {
        self.handle.conductor_enabled().await.map_err(to_rpc_error)
    }

    async fn set_recover_mode(&self, mode: bool) -> RpcResult<()> {
        self.handle.set_recover_mode(mode).await.map_err(to_rpc_error)
    }

    async fn reset_derivation_pipeline(&self) -> RpcResult<()> {
        self.handle.reset_derivation_pipeline().await.map_err(to_rpc_error)
    }
}

/// The rollup node RPC server, serving status snapshots.
#[derive(Debug, Clone)]
pub struct RollupRpc {
    handle: DriverHandle,
}

impl RollupRpc {
    /// Creates the server over a driver handle.
    pub const fn new(handle: DriverHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl RollupNodeApiServer for RollupRpc {
    async fn sync_status(&self) -> RpcResult<SyncStatus> {
        Ok(self.handle.sync_status())
    }

    async fn block_ref_with_status(&self, number: u64) -> RpcResult<BlockRefWithStatusResponse> {
        let (block_ref, sync_status) =
            self.handle.block_ref_with_status(number).await.map_err(to_rpc_error)?;
        Ok(BlockRefWithStatusResponse { block_ref, sync_status })
    }
}
