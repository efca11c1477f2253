//! The driver loop: owns the channels, timers, and force-reset handling, and
//! multiplexes every other component.

use crate::{
    clsync::CLSyncDeriver, derivation::SyncDeriver, engine::EngineDeriver,
    finality::FinalityDeriver, scheduler::StepSchedulingDeriver, sequencer::SequencerDeriver,
    status::StatusTracker, AltSync, AttributesBuilder, ConductorClient, DerivationPipeline,
    Deriver, DriverConfig, ELSyncClient, Emitter, Event, EventSystem, L1OriginSelector, L2Chain,
    Metrics, Network, SafeHeadListener, SequencerStateListener, StepSchedule,
    ALT_SYNC_REQUEST_TIMEOUT, HALT_GRACE_PERIOD, L1_SIGNAL_TIMEOUT,
};
use cp_engine::{EngineController, SyncMode};
use cp_protocol::{ExecutionPayloadEnvelope, L1BlockRef, L2BlockRef, RollupConfig, SyncStatus};
use cp_rpc::{SequencerAdminError, SequencerAdminQuery};
use futures::future::OptionFuture;
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// A request to serialize a read against the loop: the loop acks at a
/// quiescence point and parks until the caller releases.
#[derive(Debug)]
pub struct StateRequest {
    /// Signals the caller that the loop reached quiescence.
    pub ack: oneshot::Sender<()>,
    /// Held by the caller while it reads; dropping it releases the loop.
    pub release: oneshot::Receiver<()>,
}

/// An error terminating the driver loop.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// A critical event halted the driver.
    #[error("driver halted on critical error: {0}")]
    Critical(String),
}

/// An error from the driver's caller-facing API.
#[derive(Debug, thiserror::Error)]
pub enum DriverApiError {
    /// The driver has shut down.
    #[error("node is closed")]
    Closed,
    /// The signal could not be delivered within its deadline.
    #[error("driver signal timed out")]
    Timeout,
    /// A local-chain read failed.
    #[error("L2 read failed: {0}")]
    L2(String),
    /// A sequencer admin operation was rejected.
    #[error(transparent)]
    Sequencer(#[from] SequencerAdminError),
}

/// Everything the driver needs, resolved at construction.
#[derive(Debug)]
pub struct DriverBuilder {
    /// The driver configuration.
    pub cfg: DriverConfig,
    /// The rollup configuration.
    pub rollup: Arc<RollupConfig>,
    /// The sync mode, fixed for the driver lifetime.
    pub sync_mode: SyncMode,
    /// The engine controller, pre-seeded from the engine.
    pub controller: EngineController,
    /// The derivation pipeline.
    pub pipeline: Box<dyn DerivationPipeline>,
    /// The safe-head journal.
    pub safe_head_listener: Box<dyn SafeHeadListener>,
    /// Read access to the local chain.
    pub l2: Arc<dyn L2Chain>,
    /// The execution-layer peer client, for EL-sync batch catch-up.
    pub el_client: Option<Arc<dyn ELSyncClient>>,
    /// The alt-sync range requester.
    pub alt_sync: Arc<dyn AltSync>,
    /// The gossip publisher.
    pub network: Arc<dyn Network>,
    /// The sequencer's attributes builder.
    pub attributes_builder: Box<dyn AttributesBuilder>,
    /// The sequencer's origin selector.
    pub origin_selector: Box<dyn L1OriginSelector>,
    /// The conductor client, if leadership is externally coordinated.
    pub conductor: Option<ConductorClient>,
    /// The sequencer state persistence hook.
    pub sequencer_state_listener: Box<dyn SequencerStateListener>,
}

impl DriverBuilder {
    /// Wires the derivers and channels, returning the caller handle and the
    /// driver to spawn.
    pub fn build(self) -> (DriverHandle, Driver) {
        let events = EventSystem::new();
        let emitter = events.emitter();
        let initial_heads = self.controller.snapshot();

        let (schedule_tx, schedule_rx) = mpsc::unbounded_channel();
        let (status_rx, status) = StatusTracker::new(initial_heads);
        let clsync =
            CLSyncDeriver::new(emitter.clone(), self.rollup.clone(), initial_heads.unsafe_l2);
        let (engine_state_rx, engine) = EngineDeriver::new(self.controller, emitter.clone());
        let derivation = SyncDeriver::new(
            self.pipeline,
            self.safe_head_listener,
            engine_state_rx,
            emitter.clone(),
            self.rollup.clone(),
            self.cfg.managed_mode,
            self.cfg.safe_head_persist_timeout,
        );
        let finality = FinalityDeriver::new(emitter.clone());
        let scheduler = StepSchedulingDeriver::new(emitter.clone(), schedule_tx);
        let sequencer = SequencerDeriver::new(
            emitter.clone(),
            self.rollup.clone(),
            &self.cfg,
            self.attributes_builder,
            self.origin_selector,
            self.network,
            self.conductor,
            self.sequencer_state_listener,
            initial_heads,
        );

        let (l1_head_tx, l1_head_rx) = mpsc::channel(10);
        let (l1_safe_tx, l1_safe_rx) = mpsc::channel(10);
        let (l1_finalized_tx, l1_finalized_rx) = mpsc::channel(10);
        let (unsafe_payload_tx, unsafe_payload_rx) = mpsc::channel(10);
        let (state_req_tx, state_req_rx) = mpsc::channel(1);
        let (force_reset_tx, force_reset_rx) = mpsc::channel(10);
        let (admin_tx, admin_rx) = mpsc::channel(16);
        let cancellation = CancellationToken::new();

        let handle = DriverHandle {
            l1_head_tx,
            l1_safe_tx,
            l1_finalized_tx,
            unsafe_payload_tx,
            state_req_tx,
            force_reset_tx,
            admin_tx,
            status_rx,
            l2: self.l2.clone(),
            cancellation: cancellation.clone(),
        };
        let driver = Driver {
            cfg: self.cfg,
            rollup: self.rollup,
            sync_mode: self.sync_mode,
            events,
            emitter,
            derivers: Derivers {
                status,
                clsync,
                engine,
                derivation,
                finality,
                scheduler,
                sequencer,
            },
            schedule_rx,
            l1_head_rx,
            l1_safe_rx,
            l1_finalized_rx,
            unsafe_payload_rx,
            state_req_rx,
            force_reset_rx,
            admin_rx,
            l2: self.l2,
            el_client: self.el_client,
            alt_sync: self.alt_sync,
            cancellation,
        };
        (handle, driver)
    }
}

/// The deriver set, in registration order. A base-layer signal is observed by
/// derivation, the finalizer, and the sequencer in exactly this order.
#[derive(Debug)]
struct Derivers {
    status: StatusTracker,
    clsync: CLSyncDeriver,
    engine: EngineDeriver,
    derivation: SyncDeriver,
    finality: FinalityDeriver,
    scheduler: StepSchedulingDeriver,
    sequencer: SequencerDeriver,
}

impl Derivers {
    fn handlers(&mut self) -> [&mut dyn Deriver; 7] {
        [
            &mut self.status,
            &mut self.clsync,
            &mut self.engine,
            &mut self.derivation,
            &mut self.finality,
            &mut self.scheduler,
            &mut self.sequencer,
        ]
    }
}

/// The driver: one task owning all state mutation.
#[derive(Debug)]
pub struct Driver {
    cfg: DriverConfig,
    rollup: Arc<RollupConfig>,
    sync_mode: SyncMode,
    events: EventSystem,
    emitter: Emitter,
    derivers: Derivers,
    schedule_rx: mpsc::UnboundedReceiver<StepSchedule>,
    l1_head_rx: mpsc::Receiver<L1BlockRef>,
    l1_safe_rx: mpsc::Receiver<L1BlockRef>,
    l1_finalized_rx: mpsc::Receiver<L1BlockRef>,
    unsafe_payload_rx: mpsc::Receiver<Arc<ExecutionPayloadEnvelope>>,
    state_req_rx: mpsc::Receiver<StateRequest>,
    force_reset_rx: mpsc::Receiver<oneshot::Sender<()>>,
    admin_rx: mpsc::Receiver<SequencerAdminQuery>,
    l2: Arc<dyn L2Chain>,
    el_client: Option<Arc<dyn ELSyncClient>>,
    alt_sync: Arc<dyn AltSync>,
    cancellation: CancellationToken,
}

impl Driver {
    /// Runs the loop until cancellation or a critical error.
    pub async fn run(mut self) -> Result<(), DriverError> {
        info!(
            target: "driver",
            sequencer_enabled = self.cfg.sequencer_enabled,
            sequencer_stopped = self.cfg.sequencer_stopped,
            recover_mode = self.cfg.recover_mode,
            sync_mode = %self.sync_mode,
            "State loop started"
        );

        // Step right away to finish syncing to the tip if we are behind.
        self.emitter.emit(Event::StepReq);

        let sync_check_interval = Duration::from_secs(self.rollup.block_time.max(1)) / 2;
        let mut alt_sync_ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + sync_check_interval,
            sync_check_interval,
        );
        alt_sync_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut last_unsafe = self.derivers.engine.unsafe_l2_head();
        let mut step_deadline: Option<tokio::time::Instant> = None;

        loop {
            if self.cancellation.is_cancelled() {
                break;
            }

            // Process all queued events before creating any new ones.
            let drained = {
                let mut handlers = self.derivers.handlers();
                self.events.drain(&mut handlers).await
            };
            if let Err(halt) = drained {
                error!(target: "driver", cause = %halt.cause, "Driver halted");
                // Idle out the grace period instead of hot-restarting.
                tokio::select! {
                    _ = tokio::time::sleep(HALT_GRACE_PERIOD) => {}
                    _ = self.cancellation.cancelled() => {}
                }
                self.cancellation.cancel();
                return Err(DriverError::Critical(halt.cause));
            }

            // Adopt any step schedule produced during the drain; the latest
            // request wins.
            while let Ok(schedule) = self.schedule_rx.try_recv() {
                step_deadline = Some(match schedule {
                    StepSchedule::Now => tokio::time::Instant::now(),
                    StepSchedule::After(delay) => tokio::time::Instant::now() + delay,
                });
            }

            let seq_deadline =
                self.derivers.sequencer.next_action().map(deadline_to_instant);

            // No need to request blocks while the head is moving or the
            // pipeline is mid-reset.
            let head = self.derivers.engine.unsafe_l2_head();
            if head != last_unsafe || !self.derivers.derivation.pipeline_ready() {
                last_unsafe = head;
                alt_sync_ticker.reset();
            }

            tokio::select! {
                biased;

                _ = self.cancellation.cancelled() => break,

                Some(_) = OptionFuture::from(seq_deadline.map(tokio::time::sleep_until)), if seq_deadline.is_some() => {
                    self.emitter.emit(Event::SequencerAction);
                }

                Some(_) = OptionFuture::from(step_deadline.map(tokio::time::sleep_until)), if step_deadline.is_some() => {
                    step_deadline = None;
                    self.emitter.emit(Event::StepAttempt);
                }

                Some(envelope) = self.unsafe_payload_rx.recv() => {
                    self.on_unsafe_payload(envelope).await;
                }

                Some(head) = self.l1_head_rx.recv() => {
                    self.emitter.emit(Event::L1HeadUpdate(head));
                    // New L1 data may unblock derivation.
                    self.emitter.emit(Event::StepReq);
                }

                Some(safe) = self.l1_safe_rx.recv() => {
                    self.emitter.emit(Event::L1SafeUpdate(safe));
                }

                Some(finalized) = self.l1_finalized_rx.recv() => {
                    self.emitter.emit(Event::L1FinalizedUpdate(finalized));
                }

                _ = alt_sync_ticker.tick() => {
                    self.on_alt_sync_tick().await;
                }

                Some(req) = self.state_req_rx.recv() => {
                    // Quiescent here: the queue was drained above. Park until
                    // the caller finishes its read.
                    let _ = req.ack.send(());
                    let _ = req.release.await;
                }

                Some(resp) = self.force_reset_rx.recv() => {
                    warn!(target: "driver", "Derivation pipeline is manually reset");
                    self.derivers.derivation.force_pipeline_reset();
                    metrics::counter!(Metrics::PIPELINE_RESETS).increment(1);
                    self.emitter.emit(Event::StepReq);
                    let _ = resp.send(());
                }

                Some(query) = self.admin_rx.recv() => {
                    self.derivers.sequencer.handle_admin_query(query).await;
                }
            }
        }

        info!(target: "driver", "State loop returned");
        Ok(())
    }

    async fn on_unsafe_payload(&mut self, envelope: Arc<ExecutionPayloadEnvelope>) {
        if self.sync_mode == SyncMode::ClSync || !self.derivers.engine.is_syncing() {
            info!(target: "driver", id = %envelope.id(), "Optimistically queueing unsafe payload");
            metrics::counter!(Metrics::RECEIVED_UNSAFE_PAYLOADS).increment(1);
            self.emitter.emit(Event::ReceivedUnsafePayload(envelope));
            self.emitter.emit(Event::StepReq);
            return;
        }

        // EL sync: drive the engine directly, bypassing the queue.
        let block_ref = match envelope.to_l2_block_ref(&self.rollup.genesis) {
            Ok(r) => r,
            Err(err) => {
                info!(target: "driver", id = %envelope.id(), %err, "Failed to derive payload block ref");
                return;
            }
        };
        if block_ref.number <= self.derivers.engine.unsafe_l2_head().number {
            return;
        }
        info!(target: "driver", id = %envelope.id(), "Inserting unsafe payload to drive EL sync");
        if let Err(err) =
            self.derivers.engine.insert_unsafe_payload_direct(&envelope, block_ref).await
        {
            warn!(target: "driver", id = %envelope.id(), %err, "Failed to insert unsafe payload for EL sync");
        }
    }

    async fn on_alt_sync_tick(&mut self) {
        match self.sync_mode {
            SyncMode::ClSync => self.check_for_gap_in_unsafe_queue().await,
            SyncMode::ElSync => self.check_sync_unsafe_blocks().await,
        }
    }

    /// Asks the alt-sync source for whatever is missing between the unsafe
    /// head and the lowest queued payload. Results come back through the
    /// unsafe payload channel; this is only an outgoing hint.
    async fn check_for_gap_in_unsafe_queue(&mut self) {
        let start = self.derivers.engine.unsafe_l2_head();
        let end = self.derivers.clsync.lowest_queued_unsafe_block();

        let range = match end {
            None => {
                debug!(target: "driver", %start, "Requesting sync with open-end range");
                Some((start, None))
            }
            Some(end) if end.number > start.number + 1 => {
                debug!(
                    target: "driver",
                    %start,
                    %end,
                    size = end.number - start.number,
                    "Requesting missing unsafe block range"
                );
                Some((start, Some(end)))
            }
            Some(_) => None,
        };
        let Some((start, end)) = range else { return };

        match tokio::time::timeout(
            ALT_SYNC_REQUEST_TIMEOUT,
            self.alt_sync.request_l2_range(start, end),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(target: "driver", %err, "Failed to request unsafe blocks to sync")
            }
            Err(_) => warn!(target: "driver", "Alt-sync range request timed out"),
        }
    }

    /// EL-sync catch-up: pull a bounded batch of payloads from the peer
    /// execution client and insert them.
    async fn check_sync_unsafe_blocks(&mut self) {
        let Some(el_client) = self.el_client.clone() else { return };

        let local = match self.l2.latest_block_ref().await {
            Ok(r) => r,
            Err(err) => {
                warn!(target: "driver", %err, "Failed to read local latest block");
                return;
            }
        };
        let remote = match el_client.latest_block_ref().await {
            Ok(r) => r,
            Err(err) => {
                warn!(target: "driver", %err, "Failed to read EL client latest block");
                return;
            }
        };
        if local.number >= remote.number {
            return;
        }

        let start = local.number + 1;
        let end = remote.number.min(start + self.cfg.max_requests_per_batch.saturating_sub(1));
        let payloads = match el_client.payloads_by_range(start, end).await {
            Ok(p) => p,
            Err(err) => {
                warn!(target: "driver", %err, start, end, "Failed to query payloads by range");
                return;
            }
        };

        for payload in payloads {
            let block_ref = match payload.to_l2_block_ref(&self.rollup.genesis) {
                Ok(r) => r,
                Err(err) => {
                    warn!(target: "driver", id = %payload.id(), %err, "Skipping undecodable payload");
                    continue;
                }
            };
            if block_ref.number <= self.derivers.engine.unsafe_l2_head().number {
                continue;
            }
            if let Err(err) =
                self.derivers.engine.insert_unsafe_payload_direct(&payload, block_ref).await
            {
                warn!(target: "driver", id = %payload.id(), %err, "Failed to insert payload for EL sync");
                break;
            }
        }
        info!(target: "driver", now = end, latest = remote.number, "Synchronized a batch of blocks");
    }
}

/// The caller-facing handle: signals in, queries out. Cloneable and shared
/// with the RPC servers.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    l1_head_tx: mpsc::Sender<L1BlockRef>,
    l1_safe_tx: mpsc::Sender<L1BlockRef>,
    l1_finalized_tx: mpsc::Sender<L1BlockRef>,
    unsafe_payload_tx: mpsc::Sender<Arc<ExecutionPayloadEnvelope>>,
    state_req_tx: mpsc::Sender<StateRequest>,
    force_reset_tx: mpsc::Sender<oneshot::Sender<()>>,
    admin_tx: mpsc::Sender<SequencerAdminQuery>,
    status_rx: watch::Receiver<SyncStatus>,
    l2: Arc<dyn L2Chain>,
    cancellation: CancellationToken,
}

impl DriverHandle {
    /// Signals a base-layer head change.
    pub async fn on_l1_head(&self, head: L1BlockRef) -> Result<(), DriverApiError> {
        send_signal(&self.l1_head_tx, head).await
    }

    /// Signals a base-layer safe-block change.
    pub async fn on_l1_safe(&self, safe: L1BlockRef) -> Result<(), DriverApiError> {
        send_signal(&self.l1_safe_tx, safe).await
    }

    /// Signals a base-layer finalized-block change.
    pub async fn on_l1_finalized(&self, finalized: L1BlockRef) -> Result<(), DriverApiError> {
        send_signal(&self.l1_finalized_tx, finalized).await
    }

    /// Delivers an unsafe payload from gossip or alt-sync.
    pub async fn on_unsafe_l2_payload(
        &self,
        envelope: ExecutionPayloadEnvelope,
    ) -> Result<(), DriverApiError> {
        self.unsafe_payload_tx
            .send(Arc::new(envelope))
            .await
            .map_err(|_| DriverApiError::Closed)
    }

    /// The current sync status. Reflects all events processed before the
    /// snapshot was published.
    pub fn sync_status(&self) -> SyncStatus {
        *self.status_rx.borrow()
    }

    /// A subscription to sync-status updates.
    pub fn status_subscription(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Reads a block reference consistent with the returned status.
    ///
    /// Finalized blocks cannot reorg, so they are read without blocking the
    /// loop. Anything newer serializes against the driver: the loop acks at a
    /// quiescence point, the read happens, and the loop is released.
    pub async fn block_ref_with_status(
        &self,
        number: u64,
    ) -> Result<(L2BlockRef, SyncStatus), DriverApiError> {
        let status = self.sync_status();
        if status.finalized_l2.number >= number {
            let block_ref = self
                .l2
                .l2_block_ref_by_number(number)
                .await
                .map_err(|err| DriverApiError::L2(err.to_string()))?;
            return Ok((block_ref, status));
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.state_req_tx
            .send(StateRequest { ack: ack_tx, release: release_rx })
            .await
            .map_err(|_| DriverApiError::Closed)?;
        ack_rx.await.map_err(|_| DriverApiError::Closed)?;

        let status = self.sync_status();
        let result = self
            .l2
            .l2_block_ref_by_number(number)
            .await
            .map_err(|err| DriverApiError::L2(err.to_string()));
        drop(release_tx);

        Ok((result?, status))
    }

    /// Forces a derivation pipeline reset, returning once the loop scheduled
    /// it.
    pub async fn reset_derivation_pipeline(&self) -> Result<(), DriverApiError> {
        let (tx, rx) = oneshot::channel();
        self.force_reset_tx.send(tx).await.map_err(|_| DriverApiError::Closed)?;
        rx.await.map_err(|_| DriverApiError::Closed)
    }

    /// Starts the sequencer on the given parent.
    pub async fn start_sequencer(
        &self,
        parent_hash: alloy_primitives::B256,
    ) -> Result<(), DriverApiError> {
        let (tx, rx) = oneshot::channel();
        self.admin_tx
            .send(SequencerAdminQuery::StartSequencer { parent_hash, tx })
            .await
            .map_err(|_| DriverApiError::Closed)?;
        rx.await.map_err(|_| DriverApiError::Closed)??;
        Ok(())
    }

    /// Stops the sequencer, returning the last sequenced head.
    pub async fn stop_sequencer(&self) -> Result<alloy_primitives::B256, DriverApiError> {
        let (tx, rx) = oneshot::channel();
        self.admin_tx
            .send(SequencerAdminQuery::StopSequencer(tx))
            .await
            .map_err(|_| DriverApiError::Closed)?;
        Ok(rx.await.map_err(|_| DriverApiError::Closed)??)
    }

    /// Whether the sequencer is actively building blocks.
    pub async fn sequencer_active(&self) -> Result<bool, DriverApiError> {
        let (tx, rx) = oneshot::channel();
        self.admin_tx
            .send(SequencerAdminQuery::SequencerActive(tx))
            .await
            .map_err(|_| DriverApiError::Closed)?;
        rx.await.map_err(|_| DriverApiError::Closed)
    }

    /// Whether an external conductor is configured.
    pub async fn conductor_enabled(&self) -> Result<bool, DriverApiError> {
        let (tx, rx) = oneshot::channel();
        self.admin_tx
            .send(SequencerAdminQuery::ConductorEnabled(tx))
            .await
            .map_err(|_| DriverApiError::Closed)?;
        rx.await.map_err(|_| DriverApiError::Closed)
    }

    /// Sets the sequencer recover mode.
    pub async fn set_recover_mode(&self, mode: bool) -> Result<(), DriverApiError> {
        self.admin_tx
            .send(SequencerAdminQuery::SetRecoverMode(mode))
            .await
            .map_err(|_| DriverApiError::Closed)
    }

    /// Overrides the conductor's leadership view.
    pub async fn override_leader(&self) -> Result<(), DriverApiError> {
        self.admin_tx
            .send(SequencerAdminQuery::OverrideLeader)
            .await
            .map_err(|_| DriverApiError::Closed)
    }

    /// Cancels the driver. Idempotent.
    pub fn close(&self) {
        self.cancellation.cancel();
    }
}

async fn send_signal(
    tx: &mpsc::Sender<L1BlockRef>,
    signal: L1BlockRef,
) -> Result<(), DriverApiError> {
    match tokio::time::timeout(L1_SIGNAL_TIMEOUT, tx.send(signal)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(DriverApiError::Closed),
        Err(_) => Err(DriverApiError::Timeout),
    }
}

/// Converts a unix-seconds deadline into a loop timer instant, preserving
/// sub-second precision of the current moment.
fn deadline_to_instant(target_secs: u64) -> tokio::time::Instant {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let delta = Duration::from_secs(target_secs).saturating_sub(now);
    tokio::time::Instant::now() + delta
}
