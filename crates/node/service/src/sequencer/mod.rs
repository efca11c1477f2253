//! The sequencer: schedules, builds, and publishes new L2 blocks.

mod conductor;
pub use conductor::{ConductorClient, ConductorError};

use crate::{
    AttributesBuilder, AttributesBuilderError, Deriver, DriverConfig, Emitter, Event,
    L1OriginSelector, Metrics, Network, SequencerStateListener,
};
use async_trait::async_trait;
use cp_engine::HeadsSnapshot;
use cp_protocol::{
    AttributesWithParent, ExecutionPayloadEnvelope, L2BlockRef, RollupConfig,
};
use cp_rpc::{SequencerAdminError, SequencerAdminQuery};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// The delay before re-attempting a failed build step, in seconds.
const BUILD_RETRY_DELAY: u64 = 1;

/// The sequencer's lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// The node is not configured to sequence.
    Disabled,
    /// Sequencing is configured but halted.
    Stopped,
    /// Waiting for the next block deadline.
    Idle,
    /// Attributes were handed to the engine for building.
    Building,
    /// A sealed payload is being committed and gossiped.
    Publishing,
}

/// Builds new blocks on top of the unsafe head on the wall-clock schedule,
/// and hands sealed payloads to the network.
#[derive(Debug)]
pub struct SequencerDeriver {
    emitter: Emitter,
    cfg: Arc<RollupConfig>,
    state: SequencerState,
    recover_mode: bool,
    max_safe_lag: u64,
    attributes_builder: Box<dyn AttributesBuilder>,
    origin_selector: Box<dyn L1OriginSelector>,
    network: Arc<dyn Network>,
    conductor: Option<ConductorClient>,
    state_listener: Box<dyn SequencerStateListener>,
    heads: HeadsSnapshot,
    last_sealed: Option<L2BlockRef>,
    /// Earliest wall-clock second the next action may run, for retry pacing.
    not_before: u64,
    lag_warned: bool,
}

impl SequencerDeriver {
    /// Creates the sequencer.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        emitter: Emitter,
        cfg: Arc<RollupConfig>,
        driver_cfg: &DriverConfig,
        attributes_builder: Box<dyn AttributesBuilder>,
        origin_selector: Box<dyn L1OriginSelector>,
        network: Arc<dyn Network>,
        conductor: Option<ConductorClient>,
        state_listener: Box<dyn SequencerStateListener>,
        heads: HeadsSnapshot,
    ) -> Self {
        let state = if !driver_cfg.sequencer_enabled {
            SequencerState::Disabled
        } else if driver_cfg.sequencer_stopped {
            SequencerState::Stopped
        } else {
            SequencerState::Idle
        };
        metrics::gauge!(Metrics::SEQUENCER_ACTIVE)
            .set(matches!(state, SequencerState::Idle) as u8 as f64);
        Self {
            emitter,
            cfg,
            state,
            recover_mode: driver_cfg.recover_mode,
            max_safe_lag: driver_cfg.sequencer_max_safe_lag,
            attributes_builder,
            origin_selector,
            network,
            conductor,
            state_listener,
            heads,
            last_sealed: None,
            not_before: 0,
            lag_warned: false,
        }
    }

    /// The sequencer's current state.
    pub const fn state(&self) -> SequencerState {
        self.state
    }

    /// Whether the sequencer is running (started and enabled).
    pub const fn active(&self) -> bool {
        matches!(
            self.state,
            SequencerState::Idle | SequencerState::Building | SequencerState::Publishing
        )
    }

    /// The wall-clock second of the next scheduled action, if any.
    ///
    /// Only an idle sequencer schedules: building and publishing complete
    /// within the drain, and a stopped or lag-paused sequencer waits for
    /// events instead of time.
    pub fn next_action(&mut self) -> Option<u64> {
        if self.state != SequencerState::Idle {
            return None;
        }
        if self.lag_exceeded() {
            if !self.lag_warned {
                self.lag_warned = true;
                warn!(
                    target: "sequencer",
                    unsafe_head = %self.heads.unsafe_l2,
                    safe = %self.heads.safe_l2,
                    max_lag = self.max_safe_lag,
                    "Paused sequencing, safe lag exceeded"
                );
            }
            return None;
        }
        self.lag_warned = false;
        let deadline = self.heads.unsafe_l2.timestamp + self.cfg.block_time;
        Some(deadline.max(self.not_before))
    }

    fn lag_exceeded(&self) -> bool {
        self.max_safe_lag > 0
            && self.heads.unsafe_l2.number.saturating_sub(self.heads.safe_l2.number)
                > self.max_safe_lag
    }

    fn retry_later(&mut self) {
        self.not_before = unix_now() + BUILD_RETRY_DELAY;
    }

    async fn on_sequencer_action(&mut self) {
        if self.state != SequencerState::Idle || self.lag_exceeded() {
            return;
        }

        if let Some(conductor) = &self.conductor {
            match conductor.leader().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(target: "sequencer", "Not the leader, skipping block production");
                    self.retry_later();
                    return;
                }
                Err(err) => {
                    warn!(target: "sequencer", %err, "Conductor unreachable, skipping block production");
                    self.retry_later();
                    return;
                }
            }
        }

        let parent = self.heads.unsafe_l2;
        let origin = match self.origin_selector.next_l1_origin(parent, self.recover_mode).await {
            Ok(origin) => origin,
            Err(err) => {
                warn!(target: "sequencer", %err, "Failed to select next L1 origin, retrying");
                self.retry_later();
                return;
            }
        };

        // Building on an origin unrelated to the parent's means the view
        // diverged; resetting is cheaper than sequencing a dead block.
        if parent.l1_origin.hash != origin.hash && parent.l1_origin.hash != origin.parent_hash {
            warn!(
                target: "sequencer",
                parent_origin = %parent.l1_origin,
                origin = %origin,
                "Cannot sequence on inconsistent L1 origin"
            );
            self.emitter
                .emit(Event::Reset { cause: "sequencer selected inconsistent origin".into() });
            return;
        }

        let mut attributes =
            match self.attributes_builder.prepare_payload_attributes(parent, origin).await {
                Ok(attrs) => attrs,
                Err(AttributesBuilderError::Temporary(err)) => {
                    debug!(target: "sequencer", err, "Temporary attributes failure, retrying");
                    self.retry_later();
                    return;
                }
                Err(AttributesBuilderError::Reset(err)) => {
                    self.emitter.emit(Event::Reset { cause: err });
                    return;
                }
                Err(AttributesBuilderError::Critical(err)) => {
                    self.emitter.emit(Event::CriticalError { cause: err });
                    return;
                }
            };

        if self.recover_mode {
            warn!(target: "sequencer", "Recover mode, producing empty block");
            attributes.no_tx_pool = true;
        }
        if attributes.timestamp > origin.timestamp + self.cfg.max_sequencer_drift {
            // Past the drift limit only deposits may be included.
            attributes.no_tx_pool = true;
        }

        info!(
            target: "sequencer",
            parent = %parent,
            origin = %origin,
            "Started sequencing new block"
        );
        self.state = SequencerState::Building;
        self.emitter.emit(Event::BuildPayload(Box::new(AttributesWithParent {
            attributes,
            parent,
            derived_from: None,
        })));
    }

    async fn on_payload_sealed(
        &mut self,
        envelope: &Arc<ExecutionPayloadEnvelope>,
        block_ref: L2BlockRef,
    ) {
        if self.state != SequencerState::Building {
            return;
        }
        self.state = SequencerState::Publishing;

        if let Some(conductor) = &self.conductor {
            if let Err(err) = conductor.commit_unsafe_payload(envelope).await {
                error!(target: "sequencer", %err, "Failed to commit payload to conductor");
            }
        }

        match self.network.publish_l2_payload(envelope).await {
            Ok(()) => {
                info!(target: "sequencer", id = %block_ref, txs = envelope.transaction_count(), "Published sequenced block");
            }
            Err(err) => {
                // The block is already canonical locally; peers can fetch it
                // through alt-sync if gossip failed.
                metrics::counter!(Metrics::PUBLISHING_ERRORS).increment(1);
                warn!(target: "sequencer", %err, id = %block_ref, "Failed to publish sequenced block");
            }
        }

        self.last_sealed = Some(block_ref);
        self.not_before = 0;
        self.state = SequencerState::Idle;
    }

    fn abort_build(&mut self) {
        if matches!(self.state, SequencerState::Building | SequencerState::Publishing) {
            self.state = SequencerState::Idle;
            self.retry_later();
        }
    }

    async fn start(&mut self, parent_hash: alloy_primitives::B256) -> Result<(), SequencerAdminError> {
        match self.state {
            SequencerState::Disabled => return Err(SequencerAdminError::Disabled),
            SequencerState::Stopped => {}
            _ => return Err(SequencerAdminError::AlreadyStarted),
        }
        if !parent_hash.is_zero() && parent_hash != self.heads.unsafe_l2.hash {
            return Err(SequencerAdminError::HeadMismatch);
        }
        if let Err(err) = self.state_listener.sequencer_started().await {
            error!(target: "sequencer", %err, "Failed to persist sequencer start");
        }
        info!(target: "sequencer", parent = %self.heads.unsafe_l2, "Starting sequencer");
        self.state = SequencerState::Idle;
        metrics::gauge!(Metrics::SEQUENCER_ACTIVE).set(1);
        Ok(())
    }

    async fn stop(&mut self) -> Result<alloy_primitives::B256, SequencerAdminError> {
        match self.state {
            SequencerState::Disabled => return Err(SequencerAdminError::Disabled),
            SequencerState::Stopped => return Err(SequencerAdminError::AlreadyStopped),
            _ => {}
        }
        if let Err(err) = self.state_listener.sequencer_stopped().await {
            error!(target: "sequencer", %err, "Failed to persist sequencer stop");
        }
        info!(target: "sequencer", "Stopping sequencer");
        self.state = SequencerState::Stopped;
        metrics::gauge!(Metrics::SEQUENCER_ACTIVE).set(0);
        Ok(self.last_sealed.map(|r| r.hash).unwrap_or(self.heads.unsafe_l2.hash))
    }

    /// Handles an admin query forwarded by the driver loop.
    pub async fn handle_admin_query(&mut self, query: SequencerAdminQuery) {
        match query {
            SequencerAdminQuery::SequencerActive(tx) => {
                let _ = tx.send(self.active());
            }
            SequencerAdminQuery::StartSequencer { parent_hash, tx } => {
                let _ = tx.send(self.start(parent_hash).await);
            }
            SequencerAdminQuery::StopSequencer(tx) => {
                let _ = tx.send(self.stop().await);
            }
            SequencerAdminQuery::ConductorEnabled(tx) => {
                let _ = tx.send(self.conductor.is_some());
            }
            SequencerAdminQuery::SetRecoverMode(mode) => {
                info!(target: "sequencer", mode, "Updated recover mode");
                self.recover_mode = mode;
            }
            SequencerAdminQuery::OverrideLeader => {
                if let Some(conductor) = &self.conductor {
                    if let Err(err) = conductor.override_leader().await {
                        error!(target: "sequencer", %err, "Failed to override leader");
                    }
                } else {
                    info!(target: "sequencer", "No conductor configured, leader override is a no-op");
                }
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

#[async_trait]
impl Deriver for SequencerDeriver {
    fn name(&self) -> &'static str {
        "sequencer"
    }

    async fn on_event(&mut self, ev: &Event) -> bool {
        match ev {
            Event::SequencerAction => self.on_sequencer_action().await,
            Event::PayloadSealed { envelope, block_ref } => {
                self.on_payload_sealed(envelope, *block_ref).await
            }
            Event::ForkchoiceUpdated(heads) => self.heads = *heads,
            Event::Reset { .. } | Event::EngineResetConfirmed { .. } => self.abort_build(),
            Event::TemporaryEngineError { .. } => self.abort_build(),
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NoopSequencerStateListener, NetworkError, OriginSelectorError};
    use cp_protocol::test_utils::{envelope_for_ref, l2_block_ref};
    use cp_protocol::{L1BlockRef, PayloadAttributes};
    use std::sync::Mutex;
    use tokio::sync::{mpsc, oneshot};

    #[derive(Debug, Default)]
    struct StaticAttributesBuilder;

    #[async_trait]
    impl AttributesBuilder for StaticAttributesBuilder {
        async fn prepare_payload_attributes(
            &self,
            parent: L2BlockRef,
            _origin: L1BlockRef,
        ) -> Result<PayloadAttributes, AttributesBuilderError> {
            Ok(PayloadAttributes { timestamp: parent.timestamp + 2, ..Default::default() })
        }
    }

    #[derive(Debug, Default)]
    struct StaticOriginSelector {
        fail: bool,
    }

    #[async_trait]
    impl L1OriginSelector for StaticOriginSelector {
        async fn next_l1_origin(
            &self,
            parent: L2BlockRef,
            _recover_mode: bool,
        ) -> Result<L1BlockRef, OriginSelectorError> {
            if self.fail {
                return Err(OriginSelectorError("l1 unreachable".into()));
            }
            // Keep the parent's origin.
            Ok(L1BlockRef {
                hash: parent.l1_origin.hash,
                number: parent.l1_origin.number,
                parent_hash: Default::default(),
                timestamp: parent.timestamp.saturating_sub(2),
            })
        }
    }

    #[derive(Debug, Default)]
    struct RecordingNetwork {
        published: Mutex<Vec<u64>>,
        fail: bool,
    }

    #[async_trait]
    impl Network for RecordingNetwork {
        async fn publish_l2_payload(
            &self,
            envelope: &ExecutionPayloadEnvelope,
        ) -> Result<(), NetworkError> {
            if self.fail {
                return Err(NetworkError("gossip down".into()));
            }
            self.published.lock().unwrap().push(envelope.block_number());
            Ok(())
        }
    }

    struct Harness {
        seq: SequencerDeriver,
        rx: mpsc::UnboundedReceiver<Event>,
        network: Arc<RecordingNetwork>,
    }

    fn harness(enabled: bool, stopped: bool, max_safe_lag: u64) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let network = Arc::new(RecordingNetwork::default());
        let heads = HeadsSnapshot {
            unsafe_l2: l2_block_ref(100, 990),
            cross_unsafe_l2: l2_block_ref(100, 990),
            pending_safe_l2: l2_block_ref(95, 950),
            safe_l2: l2_block_ref(95, 950),
            finalized_l2: l2_block_ref(90, 900),
        };
        let driver_cfg = DriverConfig {
            sequencer_enabled: enabled,
            sequencer_stopped: stopped,
            sequencer_max_safe_lag: max_safe_lag,
            ..Default::default()
        };
        let seq = SequencerDeriver::new(
            Emitter::from_raw(tx),
            Arc::new(RollupConfig { block_time: 2, max_sequencer_drift: 600, ..Default::default() }),
            &driver_cfg,
            Box::new(StaticAttributesBuilder),
            Box::new(StaticOriginSelector::default()),
            network.clone(),
            None,
            Box::new(NoopSequencerStateListener),
            heads,
        );
        Harness { seq, rx, network }
    }

    fn kinds(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.kind());
        }
        out
    }

    #[tokio::test]
    async fn test_action_builds_on_unsafe_head() {
        let mut h = harness(true, false, 0);
        assert_eq!(h.seq.state(), SequencerState::Idle);

        h.seq.on_event(&Event::SequencerAction).await;
        assert_eq!(h.seq.state(), SequencerState::Building);
        assert_eq!(kinds(&mut h.rx), vec!["build-payload"]);
    }

    #[tokio::test]
    async fn test_sealed_payload_is_published() {
        let mut h = harness(true, false, 0);
        h.seq.on_event(&Event::SequencerAction).await;

        let sealed = l2_block_ref(101, 990);
        h.seq
            .on_event(&Event::PayloadSealed {
                envelope: Arc::new(envelope_for_ref(&sealed)),
                block_ref: sealed,
            })
            .await;
        assert_eq!(h.seq.state(), SequencerState::Idle);
        assert_eq!(*h.network.published.lock().unwrap(), vec![101]);
    }

    #[tokio::test]
    async fn test_next_action_schedules_one_block_time_ahead() {
        let mut h = harness(true, false, 0);
        let parent_ts = l2_block_ref(100, 990).timestamp;
        assert_eq!(h.seq.next_action(), Some(parent_ts + 2));
    }

    #[tokio::test]
    async fn test_disabled_sequencer_never_schedules() {
        let mut h = harness(false, false, 0);
        assert_eq!(h.seq.state(), SequencerState::Disabled);
        assert_eq!(h.seq.next_action(), None);

        h.seq.on_event(&Event::SequencerAction).await;
        assert_eq!(kinds(&mut h.rx), Vec::<&str>::new());
    }

    #[tokio::test]
    async fn test_zero_max_safe_lag_never_pauses() {
        let mut h = harness(true, false, 0);
        // Lag of 5 blocks with the check disabled.
        assert!(h.seq.next_action().is_some());
    }

    #[tokio::test]
    async fn test_lag_pauses_sequencing() {
        let mut h = harness(true, false, 3);
        assert_eq!(h.seq.next_action(), None);
        h.seq.on_event(&Event::SequencerAction).await;
        assert_eq!(kinds(&mut h.rx), Vec::<&str>::new());
    }

    #[tokio::test]
    async fn test_admin_start_stop_round_trip() {
        let mut h = harness(true, true, 0);
        assert_eq!(h.seq.state(), SequencerState::Stopped);

        let (tx, rx) = oneshot::channel();
        h.seq
            .handle_admin_query(SequencerAdminQuery::StartSequencer {
                parent_hash: alloy_primitives::B256::ZERO,
                tx,
            })
            .await;
        assert_eq!(rx.await.unwrap(), Ok(()));
        assert!(h.seq.active());

        // Starting again fails.
        let (tx, rx) = oneshot::channel();
        h.seq
            .handle_admin_query(SequencerAdminQuery::StartSequencer {
                parent_hash: alloy_primitives::B256::ZERO,
                tx,
            })
            .await;
        assert_eq!(rx.await.unwrap(), Err(SequencerAdminError::AlreadyStarted));

        let (tx, rx) = oneshot::channel();
        h.seq.handle_admin_query(SequencerAdminQuery::StopSequencer(tx)).await;
        assert_eq!(rx.await.unwrap(), Ok(l2_block_ref(100, 990).hash));

        let (tx, rx) = oneshot::channel();
        h.seq.handle_admin_query(SequencerAdminQuery::StopSequencer(tx)).await;
        assert_eq!(rx.await.unwrap(), Err(SequencerAdminError::AlreadyStopped));
    }

    #[tokio::test]
    async fn test_start_rejects_mismatched_parent() {
        let mut h = harness(true, true, 0);
        let (tx, rx) = oneshot::channel();
        h.seq
            .handle_admin_query(SequencerAdminQuery::StartSequencer {
                parent_hash: alloy_primitives::B256::repeat_byte(0x99),
                tx,
            })
            .await;
        assert_eq!(rx.await.unwrap(), Err(SequencerAdminError::HeadMismatch));
    }

    #[tokio::test]
    async fn test_origin_failure_retries_later() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let heads = HeadsSnapshot {
            unsafe_l2: l2_block_ref(100, 990),
            ..Default::default()
        };
        let mut seq = SequencerDeriver::new(
            Emitter::from_raw(tx),
            Arc::new(RollupConfig { block_time: 2, ..Default::default() }),
            &DriverConfig { sequencer_enabled: true, ..Default::default() },
            Box::new(StaticAttributesBuilder),
            Box::new(StaticOriginSelector { fail: true }),
            Arc::new(RecordingNetwork::default()),
            None,
            Box::new(NoopSequencerStateListener),
            heads,
        );

        seq.on_event(&Event::SequencerAction).await;
        assert_eq!(seq.state(), SequencerState::Idle);
        assert!(kinds(&mut rx).is_empty());
        // The retry pushes the deadline into the future.
        assert!(seq.next_action().unwrap() >= unix_now());
    }
}
