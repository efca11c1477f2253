//! A JWT-authenticated Engine API client.

use crate::{EngineApi, EngineClientError};
use alloy_json_rpc::{RpcRecv, RpcSend};
use alloy_primitives::{Bytes, B256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_engine::{
    ExecutionPayloadV3, ForkchoiceState, ForkchoiceUpdated, JwtSecret, PayloadId, PayloadStatus,
};
use alloy_transport_http::{
    hyper_util::{
        client::legacy::{connect::HttpConnector, Client},
        rt::TokioExecutor,
    },
    AuthLayer, AuthService, Http, HyperClient,
};
use async_trait::async_trait;
use cp_protocol::{
    BlockId, BlockLabel, BlockRefError, ExecutionPayloadEnvelope, L1BlockInfo, L2BlockRef,
    PayloadAttributes, RollupConfig, DEPOSIT_TX_TYPE,
};
use http_body_util::Full;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tower::ServiceBuilder;
use url::Url;

/// The deadline applied to every engine call.
pub const ENGINE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A Hyper HTTP client with a JWT authentication layer.
type HyperAuthClient<B = Full<Bytes>> = HyperClient<B, AuthService<Client<HttpConnector, B>>>;

/// An Engine API client over authenticated HTTP.
///
/// Authentication uses the shared 32-byte secret in a bearer claim; claim
/// freshness is handled by the auth layer. Every call observes
/// [`ENGINE_CALL_TIMEOUT`].
#[derive(Debug, Clone)]
pub struct EngineClient {
    /// The authenticated engine provider.
    engine: RootProvider,
    /// The rollup configuration, for payload-to-ref conversion.
    cfg: Arc<RollupConfig>,
}

impl EngineClient {
    /// Creates an authenticated RPC provider for the given address and secret.
    fn rpc_client(addr: Url, jwt: JwtSecret) -> RootProvider {
        let hyper_client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
        let auth_layer = AuthLayer::new(jwt);
        let service = ServiceBuilder::new().layer(auth_layer).service(hyper_client);
        let layer_transport: HyperAuthClient = HyperClient::with_service(service);

        let http_hyper = Http::with_client(layer_transport, addr);
        let rpc_client = RpcClient::new(http_hyper, false);
        RootProvider::new(rpc_client)
    }

    /// Creates a new [`EngineClient`] against the engine endpoint.
    pub fn new_http(engine: Url, cfg: Arc<RollupConfig>, jwt: JwtSecret) -> Self {
        Self { engine: Self::rpc_client(engine, jwt), cfg }
    }

    /// The rollup configuration this client converts blocks with.
    pub fn cfg(&self) -> &RollupConfig {
        &self.cfg
    }

    async fn request<P, R>(&self, method: &'static str, params: P) -> Result<R, EngineClientError>
    where
        P: RpcSend,
        R: RpcRecv,
    {
        tokio::time::timeout(ENGINE_CALL_TIMEOUT, self.engine.client().request(method, params))
            .await
            .map_err(|_| EngineClientError::Timeout(ENGINE_CALL_TIMEOUT))?
            .map_err(Into::into)
    }

    async fn block_ref(
        &self,
        method: &'static str,
        param: serde_json::Value,
        descr: String,
    ) -> Result<L2BlockRef, EngineClientError> {
        let block: Option<RpcBlock> = self.request(method, (param, true)).await?;
        let block = block.ok_or(EngineClientError::BlockNotFound(descr))?;
        block.to_l2_block_ref(self.cfg.as_ref())
    }
}

#[async_trait]
impl EngineApi for EngineClient {
    async fn forkchoice_update(
        &self,
        state: ForkchoiceState,
        attrs: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdated, EngineClientError> {
        trace!(target: "engine", head = %state.head_block_hash, "Sending forkchoice update");
        self.request("engine_forkchoiceUpdatedV3", (state, attrs)).await
    }

    async fn new_payload(
        &self,
        envelope: &ExecutionPayloadEnvelope,
    ) -> Result<PayloadStatus, EngineClientError> {
        trace!(target: "engine", id = %envelope.id(), "Inserting payload");
        let parent_beacon_root = envelope.parent_beacon_block_root.unwrap_or_default();
        self.request(
            "engine_newPayloadV3",
            (envelope.execution_payload.clone(), Vec::<B256>::new(), parent_beacon_root),
        )
        .await
    }

    async fn get_payload(&self, id: PayloadId) -> Result<ExecutionPayloadV3, EngineClientError> {
        let resp: GetPayloadResponse = self.request("engine_getPayloadV3", (id,)).await?;
        Ok(resp.execution_payload)
    }

    async fn l2_block_ref_by_label(
        &self,
        label: BlockLabel,
    ) -> Result<L2BlockRef, EngineClientError> {
        self.block_ref(
            "eth_getBlockByNumber",
            serde_json::Value::String(label.as_str().to_string()),
            label.to_string(),
        )
        .await
    }

    async fn l2_block_ref_by_number(&self, number: u64) -> Result<L2BlockRef, EngineClientError> {
        self.block_ref(
            "eth_getBlockByNumber",
            serde_json::Value::String(format!("{number:#x}")),
            number.to_string(),
        )
        .await
    }

    async fn l2_block_ref_by_hash(&self, hash: B256) -> Result<L2BlockRef, EngineClientError> {
        let param = serde_json::Value::String(hash.to_string());
        self.block_ref("eth_getBlockByHash", param, hash.to_string()).await
    }
}

/// The response of `engine_getPayload`; fields beyond the payload are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPayloadResponse {
    execution_payload: ExecutionPayloadV3,
}

/// The slice of an RPC block the driver reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    hash: B256,
    parent_hash: B256,
    #[serde(with = "cp_protocol::quantity")]
    number: u64,
    #[serde(with = "cp_protocol::quantity")]
    timestamp: u64,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

/// The slice of an RPC transaction needed to read the L1 info deposit.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    #[serde(rename = "type", default, with = "cp_protocol::quantity::opt")]
    ty: Option<u64>,
    #[serde(default)]
    input: Bytes,
}

impl RpcBlock {
    /// Derives the block's [`L2BlockRef`], reading the L1 info deposit out of
    /// the first transaction for non-genesis blocks.
    fn to_l2_block_ref(&self, cfg: &RollupConfig) -> Result<L2BlockRef, EngineClientError> {
        let (l1_origin, sequence_number) = if self.number == cfg.genesis.l2.number {
            (cfg.genesis.l1, 0)
        } else {
            let first =
                self.transactions.first().ok_or(BlockRefError::EmptyTransactions)?;
            if first.ty != Some(DEPOSIT_TX_TYPE as u64) {
                return Err(BlockRefError::NotDepositTx {
                    got: first.ty.unwrap_or_default() as u8,
                }
                .into());
            }
            let info = L1BlockInfo::from_calldata(&first.input)?;
            (BlockId { hash: info.hash, number: info.number }, info.sequence_number)
        };
        Ok(L2BlockRef {
            hash: self.hash,
            number: self.number,
            parent_hash: self.parent_hash,
            timestamp: self.timestamp,
            l1_origin,
            sequence_number,
        })
    }
}
