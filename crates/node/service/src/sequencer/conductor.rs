//! A client for the external sequencer-coordination ("conductor") service.

use alloy_rpc_client::ReqwestClient;
use alloy_transport::{RpcError, TransportErrorKind};
use cp_protocol::ExecutionPayloadEnvelope;
use url::Url;

/// A client for the conductor service via RPC. The conductor decides
/// leadership; no consensus is implemented in the driver.
#[derive(Debug, Clone)]
pub struct ConductorClient {
    /// The inner RPC provider.
    rpc: ReqwestClient,
}

impl ConductorClient {
    /// Creates a new conductor client using HTTP transport.
    pub fn new_http(url: Url) -> Self {
        Self { rpc: ReqwestClient::new_http(url) }
    }

    /// Check if this node is the leader.
    pub async fn leader(&self) -> Result<bool, ConductorError> {
        let result: bool = self.rpc.request("conductor_leader", ()).await?;
        Ok(result)
    }

    /// Check if the conductor is active.
    pub async fn conductor_active(&self) -> Result<bool, ConductorError> {
        let result: bool = self.rpc.request("conductor_active", ()).await?;
        Ok(result)
    }

    /// Override the leader of the conductor.
    pub async fn override_leader(&self) -> Result<(), ConductorError> {
        let _result: () = self.rpc.request("conductor_overrideLeader", ()).await?;
        Ok(())
    }

    /// Commit an unsafe payload to the conductor before it is gossiped.
    pub async fn commit_unsafe_payload(
        &self,
        payload: &ExecutionPayloadEnvelope,
    ) -> Result<(), ConductorError> {
        let _result: () = self.rpc.request("conductor_commitUnsafePayload", [payload]).await?;
        Ok(())
    }
}

/// Error type for conductor operations.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// An error occurred while making an RPC call to the conductor.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError<TransportErrorKind>),
}
