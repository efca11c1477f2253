//! End-to-end driver scenarios against mock collaborators.

use async_trait::async_trait;
use cp_engine::{
    test_utils::{MockEngine, MockL1},
    EngineController, EngineState, SyncMode,
};
use cp_node_service::{
    AltSync, AltSyncError, AttributesBuilder, AttributesBuilderError, DerivationPipeline,
    DriverBuilder, DriverConfig, DriverHandle, ELSyncClient, L1OriginSelector, L2Chain,
    L2ChainError, Network, NetworkError, NoopSafeHeadListener, NoopSequencerStateListener,
    OriginSelectorError, PipelineStepError, SafeHeadListener, StepOutcome,
};
use cp_protocol::{
    test_utils::{envelope_for_ref, l1_block_ref, l2_block_ref},
    AttributesWithParent, ExecutionPayloadEnvelope, L1BlockRef, L2BlockRef, PayloadAttributes,
    RollupConfig, SyncStatus,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::watch;

/// A pipeline whose outcomes are scripted from the test, with shared
/// observability.
#[derive(Debug, Default)]
struct PipelineScript {
    outcomes: VecDeque<Result<StepOutcome, PipelineStepError>>,
    resets: u32,
    confirmed: u32,
    ready: bool,
}

#[derive(Debug, Clone, Default)]
struct SharedPipeline(Arc<Mutex<PipelineScript>>);

impl SharedPipeline {
    fn new_ready() -> Self {
        Self(Arc::new(Mutex::new(PipelineScript { ready: true, ..Default::default() })))
    }

    fn push(&self, outcome: Result<StepOutcome, PipelineStepError>) {
        self.0.lock().unwrap().outcomes.push_back(outcome);
    }

    fn resets(&self) -> u32 {
        self.0.lock().unwrap().resets
    }

    fn confirmed(&self) -> u32 {
        self.0.lock().unwrap().confirmed
    }
}

#[async_trait]
impl DerivationPipeline for SharedPipeline {
    async fn step(&mut self, _pending_safe: L2BlockRef) -> Result<StepOutcome, PipelineStepError> {
        self.0
            .lock()
            .unwrap()
            .outcomes
            .pop_front()
            .unwrap_or(Ok(StepOutcome::Idle { origin: L1BlockRef::default() }))
    }

    fn reset(&mut self) {
        let mut inner = self.0.lock().unwrap();
        inner.resets += 1;
        inner.ready = false;
    }

    fn confirm_engine_reset(&mut self) {
        let mut inner = self.0.lock().unwrap();
        inner.confirmed += 1;
        inner.ready = true;
    }

    fn origin(&self) -> L1BlockRef {
        L1BlockRef::default()
    }

    fn ready(&self) -> bool {
        self.0.lock().unwrap().ready
    }
}

/// An L2 reader over a movable latest block.
#[derive(Debug, Default)]
struct MockL2Chain {
    latest: Mutex<Option<L2BlockRef>>,
}

impl MockL2Chain {
    fn set_latest(&self, r: L2BlockRef) {
        *self.latest.lock().unwrap() = Some(r);
    }
}

#[async_trait]
impl L2Chain for MockL2Chain {
    async fn l2_block_ref_by_number(&self, number: u64) -> Result<L2BlockRef, L2ChainError> {
        Ok(l2_block_ref(number, 990))
    }

    async fn latest_block_ref(&self) -> Result<L2BlockRef, L2ChainError> {
        self.latest.lock().unwrap().ok_or(L2ChainError::NotFound(0))
    }
}

/// An EL peer serving a fixed chain tip.
#[derive(Debug)]
struct MockELClient {
    tip: u64,
}

#[async_trait]
impl ELSyncClient for MockELClient {
    async fn latest_block_ref(&self) -> Result<L2BlockRef, L2ChainError> {
        Ok(chained_ref(self.tip))
    }

    async fn payloads_by_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<ExecutionPayloadEnvelope>, L2ChainError> {
        Ok((start..=end.min(self.tip)).map(|n| envelope_for_ref(&chained_ref(n))).collect())
    }
}

#[derive(Debug, Default)]
struct RecordingAltSync {
    requests: Mutex<Vec<(u64, Option<u64>)>>,
}

#[async_trait]
impl AltSync for RecordingAltSync {
    async fn request_l2_range(
        &self,
        start: L2BlockRef,
        end: Option<L2BlockRef>,
    ) -> Result<(), AltSyncError> {
        self.requests.lock().unwrap().push((start.number, end.map(|r| r.number)));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecordingNetwork {
    published: Mutex<Vec<u64>>,
}

#[async_trait]
impl Network for RecordingNetwork {
    async fn publish_l2_payload(
        &self,
        envelope: &ExecutionPayloadEnvelope,
    ) -> Result<(), NetworkError> {
        self.published.lock().unwrap().push(envelope.block_number());
        Ok(())
    }
}

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
struct StaticOriginSelector;

#[async_trait]
impl L1OriginSelector for StaticOriginSelector {
    async fn next_l1_origin(
        &self,
        parent: L2BlockRef,
        _recover_mode: bool,
    ) -> Result<L1BlockRef, OriginSelectorError> {
        Ok(L1BlockRef {
            hash: parent.l1_origin.hash,
            number: parent.l1_origin.number,
            parent_hash: Default::default(),
            timestamp: parent.timestamp.saturating_sub(2),
        })
    }
}

/// A chain of refs whose parent hashes line up, used for catch-up scenarios.
fn chained_ref(number: u64) -> L2BlockRef {
    l2_block_ref(number, 990)
}

struct Fixture {
    engine: Arc<MockEngine>,
    l1: Arc<MockL1>,
    l2: Arc<MockL2Chain>,
    alt_sync: Arc<RecordingAltSync>,
    network: Arc<RecordingNetwork>,
    pipeline: SharedPipeline,
    cfg: DriverConfig,
    sync_mode: SyncMode,
    el_tip: Option<u64>,
    heads: (u64, u64, u64),
    safe_head_listener: Option<Box<dyn SafeHeadListener>>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            engine: Arc::new(MockEngine::default()),
            l1: Arc::new(MockL1::default()),
            l2: Arc::new(MockL2Chain::default()),
            alt_sync: Arc::new(RecordingAltSync::default()),
            network: Arc::new(RecordingNetwork::default()),
            pipeline: SharedPipeline::new_ready(),
            cfg: DriverConfig::default(),
            sync_mode: SyncMode::ClSync,
            el_tip: None,
            heads: (100, 100, 100),
            safe_head_listener: None,
        }
    }

    fn rollup() -> Arc<RollupConfig> {
        Arc::new(RollupConfig { block_time: 2, max_sequencer_drift: 600, ..Default::default() })
    }

    /// Builds and spawns the driver; returns the handle and a status
    /// subscription.
    fn launch(self) -> (DriverHandle, watch::Receiver<SyncStatus>) {
        let (finalized, safe, unsafe_head) = self.heads;
        let state = EngineState::new(
            chained_ref(finalized),
            chained_ref(safe),
            chained_ref(unsafe_head),
        );
        let controller = EngineController::new(
            self.engine.clone(),
            self.l1.clone(),
            Self::rollup(),
            self.sync_mode,
            state,
        );
        let builder = DriverBuilder {
            cfg: self.cfg,
            rollup: Self::rollup(),
            sync_mode: self.sync_mode,
            controller,
            pipeline: Box::new(self.pipeline.clone()),
            safe_head_listener: self
                .safe_head_listener
                .unwrap_or_else(|| Box::new(NoopSafeHeadListener)),
            l2: self.l2.clone(),
            el_client: self.el_tip.map(|tip| {
                Arc::new(MockELClient { tip }) as Arc<dyn ELSyncClient>
            }),
            alt_sync: self.alt_sync.clone(),
            network: self.network.clone(),
            attributes_builder: Box::new(StaticAttributesBuilder),
            origin_selector: Box::new(StaticOriginSelector),
            conductor: None,
            sequencer_state_listener: Box::new(NoopSequencerStateListener),
        };
        let (handle, driver) = builder.build();
        tokio::spawn(driver.run());
        let status = handle.status_subscription();
        (handle, status)
    }
}

/// The head safety ordering must hold on every observable snapshot.
fn assert_ordered(s: &SyncStatus) {
    assert!(
        s.finalized_l2.number <= s.safe_l2.number
            && s.safe_l2.number <= s.pending_safe_l2.number
            && s.pending_safe_l2.number <= s.cross_unsafe_l2.number
            && s.cross_unsafe_l2.number <= s.unsafe_l2.number,
        "heads out of order: {s:?}"
    );
}

async fn wait_for_status(
    rx: &mut watch::Receiver<SyncStatus>,
    what: &str,
    cond: impl FnMut(&SyncStatus) -> bool,
) -> SyncStatus {
    match tokio::time::timeout(Duration::from_secs(5), rx.wait_for(cond)).await {
        Ok(Ok(status)) => *status,
        _ => panic!("timed out waiting for {what}"),
    }
}

#[tokio::test]
async fn test_cold_start_derives_safe_block() {
    // Engine reports unsafe = safe = finalized = 100; the pipeline yields
    // attributes for block 101 derived from L1 995.
    let fixture = Fixture::new();
    let parent = chained_ref(100);
    let mut built = chained_ref(101);
    built.parent_hash = parent.hash;
    fixture.engine.push_built_payload(envelope_for_ref(&built).execution_payload);
    fixture.pipeline.push(Ok(StepOutcome::Attributes(Box::new(AttributesWithParent {
        attributes: PayloadAttributes { timestamp: built.timestamp, ..Default::default() },
        parent,
        derived_from: Some(l1_block_ref(995)),
    }))));

    let (handle, mut status) = fixture.launch();
    handle.on_l1_head(l1_block_ref(1001)).await.unwrap();

    let snapshot =
        wait_for_status(&mut status, "safe head at 101", |s| s.safe_l2.number == 101).await;
    assert_eq!(snapshot.finalized_l2.number, 100);
    assert_eq!(snapshot.unsafe_l2.number, 101);
    assert_ordered(&snapshot);

    let snapshot =
        wait_for_status(&mut status, "l1 head at 1001", |s| s.head_l1.number == 1001).await;
    assert_eq!(snapshot.head_l1, l1_block_ref(1001));
    handle.close();
}

#[tokio::test]
async fn test_gap_triggers_alt_sync_request_and_fills() {
    // Unsafe head 200, queue receives 205: after block_time/2 the driver asks
    // alt-sync for [200, 205); gossip then delivers 201..204.
    let mut fixture = Fixture::new();
    fixture.heads = (90, 95, 200);
    let alt_sync = fixture.alt_sync.clone();

    let (handle, mut status) = fixture.launch();
    handle.on_unsafe_l2_payload(envelope_for_ref(&chained_ref(205))).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if alt_sync.requests.lock().unwrap().contains(&(200, Some(205))) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no alt-sync range request seen");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for number in 201..=204 {
        handle.on_unsafe_l2_payload(envelope_for_ref(&chained_ref(number))).await.unwrap();
    }
    let snapshot =
        wait_for_status(&mut status, "unsafe head at 205", |s| s.unsafe_l2.number == 205).await;
    assert_eq!(snapshot.unsafe_l2, chained_ref(205));
    assert_ordered(&snapshot);
    handle.close();
}

#[tokio::test]
async fn test_pipeline_reset_rolls_back_safe_head() {
    // The pipeline demands a reset; the engine view walks the safe head back
    // from 150 to 148, the journal records the reset, and the pipeline is
    // confirmed exactly once.
    let mut fixture = Fixture::new();
    fixture.heads = (140, 150, 160);
    fixture.pipeline.push(Err(PipelineStepError::Reset("origin mismatch".into())));

    let mut stale_150 = chained_ref(150);
    stale_150.l1_origin = cp_protocol::BlockId {
        hash: alloy_primitives::B256::repeat_byte(0xdd),
        number: 995,
    };
    let mut stale_149 = chained_ref(149);
    stale_149.l1_origin = cp_protocol::BlockId {
        hash: alloy_primitives::B256::repeat_byte(0xcc),
        number: 994,
    };
    let good_148 = {
        let mut r = chained_ref(148);
        r.l1_origin = l1_block_ref(994).id();
        r
    };

    fixture.engine.set_label(cp_protocol::BlockLabel::Latest, chained_ref(160));
    fixture.engine.set_label(cp_protocol::BlockLabel::Safe, stale_150);
    fixture.engine.set_label(cp_protocol::BlockLabel::Finalized, chained_ref(140));
    fixture.engine.insert_ref_by_hash(stale_150.parent_hash, stale_149);
    fixture.engine.insert_ref_by_hash(stale_149.parent_hash, good_148);
    fixture.l1.insert(l1_block_ref(995));
    fixture.l1.insert(l1_block_ref(994));

    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("safe_head_db");
    fixture.safe_head_listener =
        Some(Box::new(cp_node_service::FileSafeHeadStore::open(&journal).unwrap()));

    let pipeline = fixture.pipeline.clone();
    let (handle, mut status) = fixture.launch();

    let snapshot =
        wait_for_status(&mut status, "safe head rollback", |s| s.safe_l2.number == 148).await;
    assert_eq!(snapshot.safe_l2, good_148);

    // Wait until the reset confirmation propagated.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while pipeline.confirmed() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "pipeline reset never confirmed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(pipeline.confirmed(), 1);

    let replayed = cp_node_service::FileSafeHeadStore::open(&journal).unwrap().replay().unwrap();
    assert!(replayed
        .iter()
        .any(|e| e.safe_head.number == 148 && e.derived_from == Default::default()));
    handle.close();
}

#[tokio::test]
async fn test_sequencer_builds_and_publishes() {
    // Sequencer enabled with a past deadline: the loop fires the action,
    // builds 101, and publishes the sealed payload exactly once.
    let mut fixture = Fixture::new();
    fixture.cfg.sequencer_enabled = true;

    let parent = chained_ref(100);
    let mut built = chained_ref(101);
    built.parent_hash = parent.hash;
    fixture.engine.push_built_payload(envelope_for_ref(&built).execution_payload);

    let network = fixture.network.clone();
    let (handle, mut status) = fixture.launch();

    let snapshot =
        wait_for_status(&mut status, "sequenced block 101", |s| s.unsafe_l2.number == 101).await;
    assert_eq!(snapshot.unsafe_l2.number, 101);
    // Safe head does not move for sequenced blocks.
    assert_eq!(snapshot.safe_l2.number, 100);
    assert_eq!(network.published.lock().unwrap().first(), Some(&101));
    handle.close();
}

#[tokio::test]
async fn test_force_reset_returns_and_resets_pipeline() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline.clone();
    let (handle, _status) = fixture.launch();

    tokio::time::timeout(Duration::from_secs(5), handle.reset_derivation_pipeline())
        .await
        .expect("force reset timed out")
        .unwrap();
    assert_eq!(pipeline.resets(), 1);
    handle.close();
}

#[tokio::test]
async fn test_el_sync_catches_up_in_batches() {
    // EL-sync mode: the local chain reports 500, the peer client 520, and the
    // loop inserts payloads batch by batch until the head reaches 520.
    let mut fixture = Fixture::new();
    fixture.sync_mode = SyncMode::ElSync;
    fixture.heads = (490, 495, 500);
    fixture.cfg.max_requests_per_batch = 10;
    fixture.el_tip = Some(520);
    fixture.l2.set_latest(chained_ref(500));

    fixture.engine.set_label(cp_protocol::BlockLabel::Latest, chained_ref(500));
    fixture.engine.set_label(cp_protocol::BlockLabel::Safe, chained_ref(495));
    fixture.engine.set_label(cp_protocol::BlockLabel::Finalized, chained_ref(490));
    fixture.l1.insert(l1_block_ref(950));
    fixture.l1.insert(l1_block_ref(990));

    let l2 = fixture.l2.clone();
    let (handle, mut status) = fixture.launch();

    let snapshot =
        wait_for_status(&mut status, "first batch at 510", |s| s.unsafe_l2.number >= 510).await;
    assert!(snapshot.unsafe_l2.number >= 510);
    l2.set_latest(chained_ref(snapshot.unsafe_l2.number));

    let snapshot =
        wait_for_status(&mut status, "catch-up to 520", |s| s.unsafe_l2.number == 520).await;
    assert_eq!(snapshot.unsafe_l2.number, 520);
    handle.close();
}

#[tokio::test]
async fn test_block_ref_with_status_is_consistent() {
    let fixture = Fixture::new();
    let (handle, _status) = fixture.launch();

    // Above the finalized height, the read serializes against the loop.
    let (block_ref, status) = tokio::time::timeout(
        Duration::from_secs(5),
        handle.block_ref_with_status(101),
    )
    .await
    .expect("state request timed out")
    .unwrap();
    assert_eq!(block_ref.number, 101);
    assert!(status.unsafe_l2.number >= status.safe_l2.number);

    // At or below the finalized height, the fast path answers directly.
    let (block_ref, _) = handle.block_ref_with_status(90).await.unwrap();
    assert_eq!(block_ref.number, 90);
    handle.close();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let fixture = Fixture::new();
    let (handle, _status) = fixture.launch();
    handle.close();
    handle.close();
}
