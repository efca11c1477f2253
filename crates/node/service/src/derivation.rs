//! The derivation pipeline driver.

use crate::{Deriver, Emitter, EngineStateSnapshot, Event, Metrics, SafeHeadListener};
use async_trait::async_trait;
use cp_engine::ResetTarget;
use cp_protocol::{AttributesWithParent, L1BlockRef, L2BlockRef, RollupConfig};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

/// Consecutive temporary engine failures tolerated before escalating to a
/// reset.
const ENGINE_TEMP_ERROR_LIMIT: u32 = 25;

/// The outcome of a pipeline step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The pipeline produced attributes for the next safe block.
    Attributes(Box<AttributesWithParent>),
    /// The pipeline exhausted its inputs.
    Idle {
        /// The base-layer block the pipeline is reading from.
        origin: L1BlockRef,
    },
}

/// An error from a pipeline step, classified into the driver's taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum PipelineStepError {
    /// A transient base-layer failure.
    #[error("temporary L1 error: {0}")]
    TemporaryL1(String),
    /// A transient engine failure.
    #[error("temporary engine error: {0}")]
    TemporaryEngine(String),
    /// The pipeline's origin is inconsistent with the engine.
    #[error("derivation reset required: {0}")]
    Reset(String),
    /// Unrecoverable.
    #[error("critical derivation error: {0}")]
    Critical(String),
}

/// The derivation pipeline, opaque to the driver.
#[async_trait]
pub trait DerivationPipeline: Send + core::fmt::Debug {
    /// Advances the pipeline one step against the pending safe head.
    async fn step(&mut self, pending_safe: L2BlockRef) -> Result<StepOutcome, PipelineStepError>;

    /// Forces a reset on the next step.
    fn reset(&mut self);

    /// Marks the engine-side reset as confirmed; the pipeline may resume.
    fn confirm_engine_reset(&mut self);

    /// The base-layer block the pipeline is currently reading from.
    fn origin(&self) -> L1BlockRef;

    /// Whether the pipeline is ready (not mid-reset).
    fn ready(&self) -> bool;
}

/// Drives the pipeline with event semantics and owns the reset protocol.
#[derive(Debug)]
pub struct SyncDeriver {
    pipeline: Box<dyn DerivationPipeline>,
    safe_head_notifs: Box<dyn SafeHeadListener>,
    engine_state: watch::Receiver<EngineStateSnapshot>,
    emitter: Emitter,
    cfg: Arc<RollupConfig>,
    managed_mode: bool,
    persist_timeout: Duration,
    engine_temp_errors: u32,
}

impl SyncDeriver {
    /// Creates the deriver.
    pub fn new(
        pipeline: Box<dyn DerivationPipeline>,
        safe_head_notifs: Box<dyn SafeHeadListener>,
        engine_state: watch::Receiver<EngineStateSnapshot>,
        emitter: Emitter,
        cfg: Arc<RollupConfig>,
        managed_mode: bool,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            pipeline,
            safe_head_notifs,
            engine_state,
            emitter,
            cfg,
            managed_mode,
            persist_timeout,
            engine_temp_errors: 0,
        }
    }

    /// Whether the pipeline is ready.
    pub fn pipeline_ready(&self) -> bool {
        self.pipeline.ready()
    }

    /// Forces a pipeline reset. Invoked by the driver loop for the admin
    /// reset request.
    pub fn force_pipeline_reset(&mut self) {
        self.pipeline.reset();
    }

    /// The synchronization step: settle engine work first, then advance the
    /// pipeline. Ordering relies on FIFO event delivery.
    fn sync_step(&self) {
        debug!(target: "driver", "Sync process step");
        self.emitter.emit(Event::TryBackupUnsafeReorg);
        self.emitter.emit(Event::TryUpdateEngine);
        self.emitter.emit(Event::AdvancePipeline);
    }

    async fn advance_pipeline(&mut self) {
        let snapshot = *self.engine_state.borrow();
        if snapshot.is_syncing {
            debug!(
                target: "driver",
                unsafe_head = %snapshot.heads.unsafe_l2,
                "Backing off derivation, execution engine is syncing"
            );
            self.emitter.emit(Event::ResetStepBackoff);
            return;
        }

        match self.pipeline.step(snapshot.heads.pending_safe_l2).await {
            Ok(StepOutcome::Attributes(attrs)) => {
                self.engine_temp_errors = 0;
                metrics::gauge!(Metrics::DERIVATION_IDLE).set(0);
                self.emitter.emit(Event::DerivedAttributes(attrs));
                self.emitter.emit(Event::StepReq);
            }
            Ok(StepOutcome::Idle { origin }) => {
                self.engine_temp_errors = 0;
                metrics::gauge!(Metrics::DERIVATION_IDLE).set(1);
                self.emitter.emit(Event::DeriverIdle { origin });
            }
            Err(PipelineStepError::TemporaryL1(cause)) => {
                self.emitter.emit(Event::TemporaryL1Error { cause })
            }
            Err(PipelineStepError::TemporaryEngine(cause)) => {
                self.emitter.emit(Event::TemporaryEngineError { cause })
            }
            Err(PipelineStepError::Reset(cause)) => self.emitter.emit(Event::Reset { cause }),
            Err(PipelineStepError::Critical(cause)) => {
                metrics::counter!(Metrics::DERIVATION_ERRORS).increment(1);
                self.emitter.emit(Event::CriticalError { cause })
            }
        }
    }

    fn on_reset(&self, cause: &str) {
        if self.managed_mode {
            warn!(target: "driver", cause, "Encountered reset in managed mode, deferring to supervisor");
            return;
        }
        warn!(target: "driver", cause, "Deriver system is resetting");
        self.emitter.emit(Event::StepReq);
        self.emitter.emit(Event::ResetEngineRequest);
    }

    /// Records the reset in the safe-head store, then confirms toward the
    /// pipeline. The store write must be durable before the confirmation.
    async fn on_engine_reset_confirmed(&mut self, target: &ResetTarget) {
        let reset = tokio::time::timeout(
            self.persist_timeout,
            self.safe_head_notifs.safe_head_reset(target.safe_head),
        )
        .await;
        match reset {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                // Without the record the pipeline must not resume; it will
                // re-trigger the reset.
                error!(target: "driver", %err, safe = %target.safe_head, "Failed to record safe-head reset");
                return;
            }
            Err(_) => {
                error!(target: "driver", safe = %target.safe_head, "Safe-head reset write timed out");
                return;
            }
        }

        if self.safe_head_notifs.enabled() && target.safe_head.id() == self.cfg.genesis.l2 {
            // The genesis block is safe by definition; record it so replays
            // start from a complete journal.
            let genesis_origin = self.cfg.genesis.l1;
            if let Err(err) = self
                .safe_head_notifs
                .safe_head_updated(self.cfg.genesis.l2, genesis_origin)
                .await
            {
                error!(target: "driver", %err, "Failed to record genesis safe head");
                return;
            }
        }

        info!(target: "driver", "Confirming pipeline reset");
        self.emitter.emit(Event::ConfirmPipelineReset);
    }

    async fn on_safe_derived(&mut self, safe: L2BlockRef, derived_from: L1BlockRef) {
        if !self.safe_head_notifs.enabled() {
            return;
        }
        let write = tokio::time::timeout(
            self.persist_timeout,
            self.safe_head_notifs.safe_head_updated(safe.id(), derived_from.id()),
        )
        .await;
        let failed = match write {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(_) => "safe-head write timed out".to_string(),
        };
        // The engine advanced but the record is missing. Roll the safe head
        // back through a reset so the entry is retried.
        self.emitter
            .emit(Event::Reset { cause: format!("safe head notifications failed: {failed}") });
    }

    fn on_temporary_engine_error(&mut self, cause: &str) {
        warn!(target: "driver", cause, "Engine temporary error");
        self.engine_temp_errors += 1;
        if self.engine_temp_errors >= ENGINE_TEMP_ERROR_LIMIT {
            self.engine_temp_errors = 0;
            self.emitter.emit(Event::Reset {
                cause: format!("engine kept failing after {ENGINE_TEMP_ERROR_LIMIT} attempts"),
            });
            return;
        }
        self.emitter.emit(Event::StepReq);
    }
}

#[async_trait]
impl Deriver for SyncDeriver {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn on_event(&mut self, ev: &Event) -> bool {
        match ev {
            Event::Step => self.sync_step(),
            Event::AdvancePipeline => self.advance_pipeline().await,
            Event::Reset { cause } => self.on_reset(cause),
            Event::EngineResetConfirmed { heads } => self.on_engine_reset_confirmed(heads).await,
            Event::ConfirmPipelineReset => self.pipeline.confirm_engine_reset(),
            Event::SafeDerived { safe, derived_from } => {
                self.on_safe_derived(*safe, *derived_from).await
            }
            Event::TemporaryL1Error { cause } => {
                warn!(target: "driver", cause, "L1 temporary error");
                self.emitter.emit(Event::StepReq);
            }
            Event::TemporaryEngineError { cause } => self.on_temporary_engine_error(cause),
            Event::DeriverIdle { .. } => self.engine_temp_errors = 0,
            _ => return false,
        }
        true
    }
}
