//! The engine controller: owns the heads view and coordinates all mutating
//! engine interactions.

use crate::{
    EngineApi, EngineControllerError, EngineState, HeadsSnapshot, L1Chain, Metrics, ResetTarget,
};
use alloy_rpc_types_engine::{ForkchoiceState, PayloadStatusEnum};
use cp_protocol::{
    AttributesWithParent, ExecutionPayloadEnvelope, L2BlockRef, RollupConfig,
};
use std::sync::Arc;

/// How the node closes the gap between its unsafe head and the network tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Sync by inserting gossiped payloads through the consensus layer.
    ClSync,
    /// Sync by letting the execution layer catch up from a peer client.
    ElSync,
}

impl core::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ClSync => f.write_str("consensus-layer"),
            Self::ElSync => f.write_str("execution-layer"),
        }
    }
}

/// The outcome of an unsafe payload insertion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Whether the engine finished EL sync with this insertion.
    pub el_sync_finished: bool,
}

/// Wraps the execution engine behind the heads view.
///
/// All mutating engine calls in the node originate here, invoked from the
/// driver task. Walk-back depth during reset-target computation is bounded to
/// keep a corrupted engine from pinning the driver.
#[derive(Debug)]
pub struct EngineController {
    client: Arc<dyn EngineApi>,
    l1: Arc<dyn L1Chain>,
    cfg: Arc<RollupConfig>,
    sync_mode: SyncMode,
    state: EngineState,
    el_sync_active: bool,
}

/// The maximum number of blocks a reset walk-back will traverse.
const RESET_WALK_LIMIT: usize = 10_000;

impl EngineController {
    /// Creates a controller over a pre-seeded heads view.
    pub fn new(
        client: Arc<dyn EngineApi>,
        l1: Arc<dyn L1Chain>,
        cfg: Arc<RollupConfig>,
        sync_mode: SyncMode,
        state: EngineState,
    ) -> Self {
        let el_sync_active = sync_mode == SyncMode::ElSync;
        Self { client, l1, cfg, sync_mode, state, el_sync_active }
    }

    /// Creates a controller by reading the engine's current labels.
    pub async fn load(
        client: Arc<dyn EngineApi>,
        l1: Arc<dyn L1Chain>,
        cfg: Arc<RollupConfig>,
        sync_mode: SyncMode,
    ) -> Result<Self, EngineControllerError> {
        let genesis = cfg.genesis_l2_ref();
        let unsafe_head = client.l2_block_ref_by_label(cp_protocol::BlockLabel::Latest).await?;
        let safe = client
            .l2_block_ref_by_label(cp_protocol::BlockLabel::Safe)
            .await
            .unwrap_or(genesis);
        let finalized = client
            .l2_block_ref_by_label(cp_protocol::BlockLabel::Finalized)
            .await
            .unwrap_or(genesis);
        Ok(Self::new(client, l1, cfg, sync_mode, EngineState::new(finalized, safe, unsafe_head)))
    }

    /// The configured sync mode.
    pub const fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// Whether the execution engine is still syncing toward the unsafe head.
    pub const fn is_syncing(&self) -> bool {
        self.el_sync_active
    }

    /// The current heads view.
    pub const fn state(&self) -> &EngineState {
        &self.state
    }

    /// A copy of all tracked heads.
    pub const fn snapshot(&self) -> HeadsSnapshot {
        self.state.snapshot()
    }

    /// The current unsafe head.
    pub const fn unsafe_l2_head(&self) -> L2BlockRef {
        self.state.unsafe_head()
    }

    /// The current safe head.
    pub const fn safe_l2_head(&self) -> L2BlockRef {
        self.state.safe_head()
    }

    /// The current pending-safe head.
    pub const fn pending_safe_l2_head(&self) -> L2BlockRef {
        self.state.pending_safe_head()
    }

    /// The current finalized head.
    pub const fn finalized_l2_head(&self) -> L2BlockRef {
        self.state.finalized_head()
    }

    /// Sends the pending forkchoice update to the engine, if any.
    ///
    /// Coalesces naturally: head mutations only mark the state dirty, and a
    /// single update carries whatever accumulated. Returns whether an update
    /// was applied.
    pub async fn try_update_forkchoice(&mut self) -> Result<bool, EngineControllerError> {
        if !self.state.forkchoice_update_needed() {
            return Ok(false);
        }
        let fc = self.state.forkchoice_state();
        let resp = self.client.forkchoice_update(fc, None).await?;
        match resp.payload_status.status {
            PayloadStatusEnum::Valid => {
                self.state.mark_forkchoice_applied();
                self.el_sync_active = false;
                metrics::counter!(Metrics::FORKCHOICE_UPDATES).increment(1);
                Ok(true)
            }
            PayloadStatusEnum::Syncing | PayloadStatusEnum::Accepted => {
                self.el_sync_active = true;
                Err(EngineControllerError::EngineSyncing)
            }
            PayloadStatusEnum::Invalid { validation_error } => {
                Err(EngineControllerError::InvalidForkchoice(validation_error))
            }
        }
    }

    /// Imports an unsafe payload and advances the unsafe head.
    ///
    /// A `SYNCING` verdict counts as acceptance: the head advances
    /// optimistically and the syncing flag flips on. `INVALID` drops the
    /// payload without touching any head.
    pub async fn insert_unsafe_payload(
        &mut self,
        envelope: &ExecutionPayloadEnvelope,
        block_ref: L2BlockRef,
    ) -> Result<InsertOutcome, EngineControllerError> {
        let status = self.client.new_payload(envelope).await?;
        if let PayloadStatusEnum::Invalid { validation_error } = status.status {
            debug!(target: "engine", id = %envelope.id(), %validation_error, "Engine rejected unsafe payload");
            return Err(EngineControllerError::InvalidPayload(envelope.id()));
        }

        let was_syncing = self.el_sync_active;
        let fc = ForkchoiceState {
            head_block_hash: block_ref.hash,
            safe_block_hash: self.state.safe_head().hash,
            finalized_block_hash: self.state.finalized_head().hash,
        };
        let resp = self.client.forkchoice_update(fc, None).await?;
        let outcome = match resp.payload_status.status {
            PayloadStatusEnum::Valid => {
                self.el_sync_active = false;
                self.state.set_unsafe_head(block_ref);
                self.state.mark_forkchoice_applied();
                InsertOutcome { el_sync_finished: was_syncing }
            }
            PayloadStatusEnum::Syncing | PayloadStatusEnum::Accepted => {
                self.el_sync_active = true;
                self.state.set_unsafe_head(block_ref);
                InsertOutcome::default()
            }
            PayloadStatusEnum::Invalid { validation_error } => {
                return Err(EngineControllerError::InvalidForkchoice(validation_error));
            }
        };
        metrics::counter!(Metrics::PAYLOAD_INSERTS).increment(1);
        Ok(outcome)
    }

    /// Re-advances the unsafe head to the backup captured by a reorg, if the
    /// backup is still canonical on the engine. Returns whether it did.
    pub async fn try_backup_unsafe_reorg(&mut self) -> Result<bool, EngineControllerError> {
        let Some(backup) = self.state.backup_unsafe_head() else {
            return Ok(false);
        };
        let canonical = self.client.l2_block_ref_by_number(backup.number).await?;
        if canonical.hash != backup.hash {
            self.state.clear_backup_unsafe_head();
            return Ok(false);
        }

        let fc = ForkchoiceState {
            head_block_hash: backup.hash,
            safe_block_hash: self.state.safe_head().hash,
            finalized_block_hash: self.state.finalized_head().hash,
        };
        let resp = self.client.forkchoice_update(fc, None).await?;
        match resp.payload_status.status {
            PayloadStatusEnum::Valid => {
                info!(target: "engine", head = %backup, "Restored backup unsafe head");
                self.state.set_unsafe_head(backup);
                self.state.clear_backup_unsafe_head();
                self.state.mark_forkchoice_applied();
                Ok(true)
            }
            PayloadStatusEnum::Syncing | PayloadStatusEnum::Accepted => {
                Err(EngineControllerError::EngineSyncing)
            }
            PayloadStatusEnum::Invalid { validation_error } => {
                self.state.clear_backup_unsafe_head();
                Err(EngineControllerError::InvalidForkchoice(validation_error))
            }
        }
    }

    /// Builds a payload from attributes, imports it, and advances the heads.
    ///
    /// Derived attributes promote the safe head as well; sequenced attributes
    /// only extend the unsafe chain.
    pub async fn build_payload(
        &mut self,
        attrs: &AttributesWithParent,
    ) -> Result<(ExecutionPayloadEnvelope, L2BlockRef), EngineControllerError> {
        let fc = ForkchoiceState {
            head_block_hash: attrs.parent.hash,
            safe_block_hash: self.state.safe_head().hash,
            finalized_block_hash: self.state.finalized_head().hash,
        };
        let resp = self.client.forkchoice_update(fc, Some(attrs.attributes.clone())).await?;
        match resp.payload_status.status {
            PayloadStatusEnum::Valid => {}
            PayloadStatusEnum::Syncing | PayloadStatusEnum::Accepted => {
                self.el_sync_active = true;
                return Err(EngineControllerError::EngineSyncing);
            }
            PayloadStatusEnum::Invalid { .. } => {
                return Err(EngineControllerError::InvalidAttributes {
                    number: attrs.block_number(),
                    derived: attrs.is_derived(),
                });
            }
        }
        let payload_id = resp.payload_id.ok_or(EngineControllerError::MissingPayloadId)?;

        let payload = self.client.get_payload(payload_id).await?;
        let envelope = ExecutionPayloadEnvelope {
            parent_beacon_block_root: attrs.attributes.parent_beacon_block_root,
            execution_payload: payload,
        };

        let status = self.client.new_payload(&envelope).await?;
        if let PayloadStatusEnum::Invalid { .. } = status.status {
            return Err(EngineControllerError::InvalidAttributes {
                number: attrs.block_number(),
                derived: attrs.is_derived(),
            });
        }

        let block_ref = envelope.to_l2_block_ref(&self.cfg.genesis)?;
        self.state.set_unsafe_head(block_ref);
        if attrs.is_derived() {
            self.state.set_pending_safe_head(block_ref);
            self.state.promote_safe_head(block_ref);
        }
        self.try_update_forkchoice().await?;

        Ok((envelope, block_ref))
    }

    /// Adopts an already-canonical block as the new safe head, after
    /// consolidation found it consistent with derived attributes.
    pub fn adopt_safe_head(&mut self, block_ref: L2BlockRef) -> bool {
        self.state.set_pending_safe_head(block_ref);
        self.state.promote_safe_head(block_ref)
    }

    /// Promotes the finalized head. Returns whether it changed.
    pub fn promote_finalized(&mut self, block_ref: L2BlockRef) -> bool {
        let changed = self.state.promote_finalized_head(block_ref);
        if changed {
            metrics::gauge!(Metrics::FINALIZED_HEAD).set(block_ref.number as f64);
        }
        changed
    }

    /// Computes a consistent `{unsafe, safe, finalized}` view by walking the
    /// engine's safe chain back until its L1 origin is canonical on L1.
    pub async fn compute_reset_target(&self) -> Result<ResetTarget, EngineControllerError> {
        let genesis = self.cfg.genesis_l2_ref();
        let unsafe_head =
            self.client.l2_block_ref_by_label(cp_protocol::BlockLabel::Latest).await?;
        let finalized = self
            .client
            .l2_block_ref_by_label(cp_protocol::BlockLabel::Finalized)
            .await
            .unwrap_or(genesis);
        let mut safe = self
            .client
            .l2_block_ref_by_label(cp_protocol::BlockLabel::Safe)
            .await
            .unwrap_or(finalized);

        for _ in 0..RESET_WALK_LIMIT {
            if safe.number <= finalized.number {
                safe = finalized;
                break;
            }
            let l1_ref = self.l1.l1_block_ref_by_number(safe.l1_origin.number).await?;
            if l1_ref.hash == safe.l1_origin.hash {
                break;
            }
            debug!(
                target: "engine",
                l2 = %safe,
                origin = %safe.l1_origin,
                "Safe block origin no longer canonical, walking back"
            );
            safe = self.client.l2_block_ref_by_hash(safe.parent_hash).await?;
        }

        Ok(ResetTarget { unsafe_head, safe_head: safe, finalized_head: finalized })
    }

    /// Applies a reset target to the heads view.
    pub fn apply_reset(&mut self, target: &ResetTarget) {
        warn!(
            target: "engine",
            unsafe_head = %target.unsafe_head,
            safe = %target.safe_head,
            finalized = %target.finalized_head,
            "Resetting engine heads"
        );
        self.state.force_reset(target);
        metrics::counter!(Metrics::ENGINE_RESETS).increment(1);
    }

    /// Reads the canonical block reference at a number from the engine.
    pub async fn canonical_ref_by_number(
        &self,
        number: u64,
    ) -> Result<L2BlockRef, EngineControllerError> {
        Ok(self.client.l2_block_ref_by_number(number).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockEngine, MockL1};
    use crate::EngineErrorSeverity;
    use alloy_rpc_types_engine::{ForkchoiceUpdated, PayloadStatus};
    use cp_protocol::test_utils::{envelope_for_ref, l1_block_ref, l2_block_ref};

    fn controller(engine: Arc<MockEngine>, l1: Arc<MockL1>) -> EngineController {
        let state =
            EngineState::new(l2_block_ref(90, 900), l2_block_ref(95, 950), l2_block_ref(100, 990));
        EngineController::new(
            engine,
            l1,
            Arc::new(RollupConfig { block_time: 2, ..Default::default() }),
            SyncMode::ClSync,
            state,
        )
    }

    #[tokio::test]
    async fn test_forkchoice_update_coalesces() {
        let engine = Arc::new(MockEngine::default());
        let mut ctl = controller(engine.clone(), Arc::new(MockL1::default()));

        assert!(ctl.try_update_forkchoice().await.unwrap());
        // Applied; a second call is a no-op without further head changes.
        assert!(!ctl.try_update_forkchoice().await.unwrap());
        assert_eq!(engine.forkchoice_calls(), 1);
    }

    #[tokio::test]
    async fn test_forkchoice_syncing_is_temporary() {
        let engine = Arc::new(MockEngine::default());
        engine.push_forkchoice_response(ForkchoiceUpdated::new(PayloadStatus::from_status(
            PayloadStatusEnum::Syncing,
        )));
        let mut ctl = controller(engine, Arc::new(MockL1::default()));

        let err = ctl.try_update_forkchoice().await.unwrap_err();
        assert_eq!(err.severity(), EngineErrorSeverity::TemporaryEngine);
        assert!(ctl.is_syncing());
    }

    #[tokio::test]
    async fn test_insert_unsafe_payload_advances_head() {
        let engine = Arc::new(MockEngine::default());
        let mut ctl = controller(engine, Arc::new(MockL1::default()));

        let mut next = l2_block_ref(101, 990);
        next.parent_hash = ctl.unsafe_l2_head().hash;
        let env = envelope_for_ref(&next);
        ctl.insert_unsafe_payload(&env, next).await.unwrap();
        assert_eq!(ctl.unsafe_l2_head(), next);
    }

    #[tokio::test]
    async fn test_insert_invalid_payload_keeps_head() {
        let engine = Arc::new(MockEngine::default());
        engine.push_payload_status(PayloadStatus::from_status(PayloadStatusEnum::Invalid {
            validation_error: "bad state root".into(),
        }));
        let mut ctl = controller(engine, Arc::new(MockL1::default()));
        let head = ctl.unsafe_l2_head();

        let next = l2_block_ref(101, 990);
        let env = envelope_for_ref(&next);
        let err = ctl.insert_unsafe_payload(&env, next).await.unwrap_err();
        assert_eq!(err.severity(), EngineErrorSeverity::InvalidPayload);
        assert_eq!(ctl.unsafe_l2_head(), head);
    }

    #[tokio::test]
    async fn test_insert_while_syncing_is_optimistic() {
        let engine = Arc::new(MockEngine::default());
        engine.push_payload_status(PayloadStatus::from_status(PayloadStatusEnum::Syncing));
        engine.push_forkchoice_response(ForkchoiceUpdated::new(PayloadStatus::from_status(
            PayloadStatusEnum::Syncing,
        )));
        let mut ctl = controller(engine, Arc::new(MockL1::default()));

        let next = l2_block_ref(105, 990);
        let env = envelope_for_ref(&next);
        let outcome = ctl.insert_unsafe_payload(&env, next).await.unwrap();
        assert!(!outcome.el_sync_finished);
        assert!(ctl.is_syncing());
        assert_eq!(ctl.unsafe_l2_head(), next);
    }

    #[tokio::test]
    async fn test_el_sync_finishes_on_valid_insert() {
        let engine = Arc::new(MockEngine::default());
        let state =
            EngineState::new(l2_block_ref(90, 900), l2_block_ref(95, 950), l2_block_ref(100, 990));
        let mut ctl = EngineController::new(
            engine,
            Arc::new(MockL1::default()),
            Arc::new(RollupConfig::default()),
            SyncMode::ElSync,
            state,
        );
        assert!(ctl.is_syncing());

        let mut next = l2_block_ref(101, 990);
        next.parent_hash = ctl.unsafe_l2_head().hash;
        let outcome = ctl.insert_unsafe_payload(&envelope_for_ref(&next), next).await.unwrap();
        assert!(outcome.el_sync_finished);
        assert!(!ctl.is_syncing());
    }

    #[tokio::test]
    async fn test_backup_reorg_restores_canonical_backup() {
        let engine = Arc::new(MockEngine::default());
        let mut ctl = controller(engine.clone(), Arc::new(MockL1::default()));
        let original = ctl.unsafe_l2_head();

        // A conflicting head at the same height captures a backup.
        let mut fork = l2_block_ref(100, 990);
        fork.hash = alloy_primitives::B256::repeat_byte(0xfe);
        fork.parent_hash = alloy_primitives::B256::repeat_byte(0xfd);
        ctl.state.set_unsafe_head(fork);
        assert_eq!(ctl.state.backup_unsafe_head(), Some(original));

        // The engine still reports the backup as canonical at that height.
        engine.insert_ref(original);
        assert!(ctl.try_backup_unsafe_reorg().await.unwrap());
        assert_eq!(ctl.unsafe_l2_head(), original);
        assert_eq!(ctl.state.backup_unsafe_head(), None);
    }

    #[tokio::test]
    async fn test_backup_reorg_without_backup_is_noop() {
        let engine = Arc::new(MockEngine::default());
        let mut ctl = controller(engine.clone(), Arc::new(MockL1::default()));
        assert!(!ctl.try_backup_unsafe_reorg().await.unwrap());
        assert_eq!(engine.forkchoice_calls(), 0);
    }

    #[tokio::test]
    async fn test_build_payload_advances_safe_for_derived_attributes() {
        let engine = Arc::new(MockEngine::default());
        let mut ctl = controller(engine.clone(), Arc::new(MockL1::default()));

        let parent = ctl.pending_safe_l2_head();
        let built = {
            let mut r = l2_block_ref(96, 951);
            r.parent_hash = parent.hash;
            r
        };
        engine.push_built_payload(envelope_for_ref(&built).execution_payload);

        let attrs = AttributesWithParent {
            attributes: Default::default(),
            parent,
            derived_from: Some(l1_block_ref(951)),
        };
        let (_, sealed) = ctl.build_payload(&attrs).await.unwrap();
        assert_eq!(sealed.number, 96);
        assert_eq!(ctl.safe_l2_head().number, 96);
    }

    #[tokio::test]
    async fn test_build_payload_keeps_safe_for_sequenced_attributes() {
        let engine = Arc::new(MockEngine::default());
        let mut ctl = controller(engine.clone(), Arc::new(MockL1::default()));

        let parent = ctl.unsafe_l2_head();
        let built = {
            let mut r = l2_block_ref(101, 990);
            r.parent_hash = parent.hash;
            r
        };
        engine.push_built_payload(envelope_for_ref(&built).execution_payload);

        let attrs =
            AttributesWithParent { attributes: Default::default(), parent, derived_from: None };
        let (_, sealed) = ctl.build_payload(&attrs).await.unwrap();
        assert_eq!(ctl.unsafe_l2_head(), sealed);
        assert_eq!(ctl.safe_l2_head().number, 95);
    }

    #[tokio::test]
    async fn test_reset_target_walks_back_to_canonical_origin() {
        let engine = Arc::new(MockEngine::default());
        let l1 = Arc::new(MockL1::default());

        // The engine reports safe at 150, derived from L1 block 995 which has
        // been reorged away; 149 and 148 derive from 994, still canonical.
        let finalized = l2_block_ref(140, 980);
        let mut safe_150 = l2_block_ref(150, 995);
        safe_150.l1_origin.hash = alloy_primitives::B256::repeat_byte(0xdd); // stale
        let safe_149 = {
            let mut r = l2_block_ref(149, 994);
            r.l1_origin.hash = alloy_primitives::B256::repeat_byte(0xcc); // also stale
            r
        };
        let safe_148 = l2_block_ref(148, 994);

        engine.set_label(cp_protocol::BlockLabel::Latest, l2_block_ref(160, 996));
        engine.set_label(cp_protocol::BlockLabel::Safe, safe_150);
        engine.set_label(cp_protocol::BlockLabel::Finalized, finalized);
        engine.insert_ref_by_hash(safe_150.parent_hash, safe_149);
        engine.insert_ref_by_hash(safe_149.parent_hash, safe_148);

        l1.insert(l1_block_ref(995));
        l1.insert(l1_block_ref(994));

        let ctl = controller(engine, l1);
        let target = ctl.compute_reset_target().await.unwrap();
        assert_eq!(target.safe_head, safe_148);
        assert_eq!(target.finalized_head, finalized);
        assert_eq!(target.unsafe_head.number, 160);
    }
}
