//! Scripted mock collaborators for controller and driver tests.

use crate::{EngineApi, EngineClientError, L1Chain, L1ChainError};
use alloy_primitives::{B256, B64};
use alloy_rpc_types_engine::{
    ExecutionPayloadV3, ForkchoiceState, ForkchoiceUpdated, PayloadId, PayloadStatus,
    PayloadStatusEnum,
};
use async_trait::async_trait;
use cp_protocol::{
    BlockId, BlockLabel, ExecutionPayloadEnvelope, L1BlockRef, L2BlockRef, PayloadAttributes,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

/// A scripted [`EngineApi`]: queued responses are popped per call, and every
/// call is recorded. Unscripted calls fall back to `VALID` responses.
#[derive(Debug, Default)]
pub struct MockEngine {
    fcu_responses: Mutex<VecDeque<ForkchoiceUpdated>>,
    payload_statuses: Mutex<VecDeque<PayloadStatus>>,
    built_payloads: Mutex<VecDeque<ExecutionPayloadV3>>,
    refs_by_number: Mutex<HashMap<u64, L2BlockRef>>,
    refs_by_hash: Mutex<HashMap<B256, L2BlockRef>>,
    labels: Mutex<HashMap<BlockLabel, L2BlockRef>>,
    fcu_calls: Mutex<Vec<(ForkchoiceState, bool)>>,
    inserted: Mutex<Vec<BlockId>>,
}

impl MockEngine {
    /// Queues a forkchoice response.
    pub fn push_forkchoice_response(&self, resp: ForkchoiceUpdated) {
        self.fcu_responses.lock().unwrap().push_back(resp);
    }

    /// Queues a `newPayload` status.
    pub fn push_payload_status(&self, status: PayloadStatus) {
        self.payload_statuses.lock().unwrap().push_back(status);
    }

    /// Queues a payload to be returned by `getPayload`.
    pub fn push_built_payload(&self, payload: ExecutionPayloadV3) {
        self.built_payloads.lock().unwrap().push_back(payload);
    }

    /// Registers a canonical block, keyed by number and hash.
    pub fn insert_ref(&self, r: L2BlockRef) {
        self.refs_by_number.lock().unwrap().insert(r.number, r);
        self.refs_by_hash.lock().unwrap().insert(r.hash, r);
    }

    /// Registers a block under an explicit hash key (e.g. a parent hash).
    pub fn insert_ref_by_hash(&self, hash: B256, r: L2BlockRef) {
        self.refs_by_hash.lock().unwrap().insert(hash, r);
        self.refs_by_number.lock().unwrap().insert(r.number, r);
    }

    /// Sets the block returned for a label.
    pub fn set_label(&self, label: BlockLabel, r: L2BlockRef) {
        self.labels.lock().unwrap().insert(label, r);
    }

    /// The number of forkchoice updates received.
    pub fn forkchoice_calls(&self) -> usize {
        self.fcu_calls.lock().unwrap().len()
    }

    /// The last forkchoice state received, if any.
    pub fn last_forkchoice(&self) -> Option<ForkchoiceState> {
        self.fcu_calls.lock().unwrap().last().map(|(s, _)| *s)
    }

    /// The payload ids inserted via `newPayload`, in order.
    pub fn inserted_payloads(&self) -> Vec<BlockId> {
        self.inserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineApi for MockEngine {
    async fn forkchoice_update(
        &self,
        state: ForkchoiceState,
        attrs: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdated, EngineClientError> {
        let with_attrs = attrs.is_some();
        self.fcu_calls.lock().unwrap().push((state, with_attrs));
        if let Some(resp) = self.fcu_responses.lock().unwrap().pop_front() {
            return Ok(resp);
        }
        Ok(ForkchoiceUpdated {
            payload_status: PayloadStatus::from_status(PayloadStatusEnum::Valid),
            payload_id: with_attrs.then(|| PayloadId(B64::from([1u8; 8]))),
        })
    }

    async fn new_payload(
        &self,
        envelope: &ExecutionPayloadEnvelope,
    ) -> Result<PayloadStatus, EngineClientError> {
        self.inserted.lock().unwrap().push(envelope.id());
        Ok(self
            .payload_statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| PayloadStatus::from_status(PayloadStatusEnum::Valid)))
    }

    async fn get_payload(&self, _id: PayloadId) -> Result<ExecutionPayloadV3, EngineClientError> {
        self.built_payloads
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineClientError::BlockNotFound("no built payload queued".into()))
    }

    async fn l2_block_ref_by_label(
        &self,
        label: BlockLabel,
    ) -> Result<L2BlockRef, EngineClientError> {
        self.labels
            .lock()
            .unwrap()
            .get(&label)
            .copied()
            .ok_or_else(|| EngineClientError::BlockNotFound(label.to_string()))
    }

    async fn l2_block_ref_by_number(&self, number: u64) -> Result<L2BlockRef, EngineClientError> {
        self.refs_by_number
            .lock()
            .unwrap()
            .get(&number)
            .copied()
            .ok_or_else(|| EngineClientError::BlockNotFound(number.to_string()))
    }

    async fn l2_block_ref_by_hash(&self, hash: B256) -> Result<L2BlockRef, EngineClientError> {
        self.refs_by_hash
            .lock()
            .unwrap()
            .get(&hash)
            .copied()
            .ok_or_else(|| EngineClientError::BlockNotFound(hash.to_string()))
    }
}

/// A scripted [`L1Chain`] backed by a map of canonical blocks.
#[derive(Debug, Default)]
pub struct MockL1 {
    refs: Mutex<HashMap<u64, L1BlockRef>>,
}

impl MockL1 {
    /// Registers a canonical L1 block.
    pub fn insert(&self, r: L1BlockRef) {
        self.refs.lock().unwrap().insert(r.number, r);
    }
}

#[async_trait]
impl L1Chain for MockL1 {
    async fn l1_block_ref_by_number(&self, number: u64) -> Result<L1BlockRef, L1ChainError> {
        self.refs
            .lock()
            .unwrap()
            .get(&number)
            .copied()
            .ok_or(L1ChainError::NotFound(number))
    }
}
