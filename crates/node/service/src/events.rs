//! The driver's typed event system.
//!
//! Events are dispatched synchronously on the driver task: [`Emitter::emit`]
//! enqueues, and [`EventSystem::drain`] delivers queued events to every
//! deriver in registration order until the queue reaches a fixed point.
//! Handlers never fail the bus; they categorize their own errors into error
//! events.

use crate::Metrics;
use cp_engine::{HeadsSnapshot, ResetTarget};
use cp_protocol::{
    AttributesWithParent, BlockId, ExecutionPayloadEnvelope, L1BlockRef, L2BlockRef,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An event routed through the driver's event system.
#[derive(Debug, Clone)]
pub enum Event {
    /// Request a pipeline step once the queue drains. Duplicate requests
    /// collapse while an attempt is outstanding.
    StepReq,
    /// The scheduled step attempt fired.
    StepAttempt,
    /// Perform the synchronization step sequence.
    Step,
    /// Reset the step backoff to its base.
    ResetStepBackoff,
    /// Run the derivation pipeline, after engine events have settled.
    AdvancePipeline,
    /// The pipeline exhausted its current inputs.
    DeriverIdle {
        /// The base-layer block the pipeline is reading from.
        origin: L1BlockRef,
    },
    /// The pipeline produced attributes for the next safe block.
    DerivedAttributes(Box<AttributesWithParent>),

    /// The base layer advanced its head.
    L1HeadUpdate(L1BlockRef),
    /// The base layer advanced its safe block.
    L1SafeUpdate(L1BlockRef),
    /// The base layer advanced its finalized block.
    L1FinalizedUpdate(L1BlockRef),

    /// An unsafe payload arrived from gossip or alt-sync.
    ReceivedUnsafePayload(Arc<ExecutionPayloadEnvelope>),
    /// The queue released the next contiguous unsafe payload for insertion.
    ProcessUnsafePayload {
        /// The payload to insert.
        envelope: Arc<ExecutionPayloadEnvelope>,
        /// Its block reference.
        block_ref: L2BlockRef,
    },
    /// The unsafe queue changed.
    UnsafeQueueUpdated {
        /// The number of queued payloads.
        queued: u64,
        /// The lowest queued block, if any.
        lowest: Option<L2BlockRef>,
    },

    /// Attempt to restore a backup unsafe head left by a failed reorg.
    TryBackupUnsafeReorg,
    /// Send any pending forkchoice update to the engine.
    TryUpdateEngine,
    /// The heads view changed.
    ForkchoiceUpdated(HeadsSnapshot),
    /// Derivation confirmed a new safe block.
    SafeDerived {
        /// The newly safe block.
        safe: L2BlockRef,
        /// The base-layer block whose data completed its derivation.
        derived_from: L1BlockRef,
    },
    /// Promote a safe block to finalized on the engine.
    PromoteFinalized(L2BlockRef),

    /// Build and import a payload from attributes.
    BuildPayload(Box<AttributesWithParent>),
    /// A sequenced payload was built and imported.
    PayloadSealed {
        /// The sealed payload.
        envelope: Arc<ExecutionPayloadEnvelope>,
        /// Its block reference.
        block_ref: L2BlockRef,
    },

    /// Derivation must be reset.
    Reset {
        /// What went wrong.
        cause: String,
    },
    /// Ask the engine controller to compute a consistent reset target.
    ResetEngineRequest,
    /// The engine applied a reset to the given heads.
    EngineResetConfirmed {
        /// The heads the engine rolled to.
        heads: ResetTarget,
    },
    /// The reset is fully recorded; the pipeline may mark itself ready.
    ConfirmPipelineReset,

    /// The sequencer's scheduled action fired.
    SequencerAction,

    /// A transient base-layer failure; back off and retry.
    TemporaryL1Error {
        /// What went wrong.
        cause: String,
    },
    /// A transient engine failure; back off and retry.
    TemporaryEngineError {
        /// What went wrong.
        cause: String,
    },
    /// The engine rejected a payload; drop it without resetting.
    InvalidPayload {
        /// The rejected payload.
        id: BlockId,
        /// The engine's verdict.
        cause: String,
    },
    /// An unrecoverable condition; the driver must shut down.
    CriticalError {
        /// What went wrong.
        cause: String,
    },
}

impl Event {
    /// A short stable name for the event variant, used in logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StepReq => "step-req",
            Self::StepAttempt => "step-attempt",
            Self::Step => "step",
            Self::ResetStepBackoff => "reset-step-backoff",
            Self::AdvancePipeline => "advance-pipeline",
            Self::DeriverIdle { .. } => "deriver-idle",
            Self::DerivedAttributes(_) => "derived-attributes",
            Self::L1HeadUpdate(_) => "l1-head-update",
            Self::L1SafeUpdate(_) => "l1-safe-update",
            Self::L1FinalizedUpdate(_) => "l1-finalized-update",
            Self::ReceivedUnsafePayload(_) => "received-unsafe-payload",
            Self::ProcessUnsafePayload { .. } => "process-unsafe-payload",
            Self::UnsafeQueueUpdated { .. } => "unsafe-queue-updated",
            Self::TryBackupUnsafeReorg => "try-backup-unsafe-reorg",
            Self::TryUpdateEngine => "try-update-engine",
            Self::ForkchoiceUpdated(_) => "forkchoice-updated",
            Self::SafeDerived { .. } => "safe-derived",
            Self::PromoteFinalized(_) => "promote-finalized",
            Self::BuildPayload(_) => "build-payload",
            Self::PayloadSealed { .. } => "payload-sealed",
            Self::Reset { .. } => "reset",
            Self::ResetEngineRequest => "reset-engine-request",
            Self::EngineResetConfirmed { .. } => "engine-reset-confirmed",
            Self::ConfirmPipelineReset => "confirm-pipeline-reset",
            Self::SequencerAction => "sequencer-action",
            Self::TemporaryL1Error { .. } => "temporary-l1-error",
            Self::TemporaryEngineError { .. } => "temporary-engine-error",
            Self::InvalidPayload { .. } => "invalid-payload",
            Self::CriticalError { .. } => "critical-error",
        }
    }
}

impl core::fmt::Display for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.kind())
    }
}

/// A handle for emitting events into the system.
///
/// Derivers hold an emitter instead of references to each other, which breaks
/// the natural cycle between the driver, derivation, and the engine.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<Event>,
}

impl Emitter {
    #[cfg(test)]
    pub(crate) fn from_raw(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Enqueues an event for the next drain.
    pub fn emit(&self, ev: Event) {
        if let Err(err) = self.tx.send(ev) {
            error!(target: "events", %err, "Event system closed, dropping event");
        }
    }
}

/// A named handler registered with the event system.
#[async_trait]
pub trait Deriver: Send {
    /// The registration name of the deriver.
    fn name(&self) -> &'static str;

    /// Handles an event. Returns whether the deriver acted on it.
    async fn on_event(&mut self, ev: &Event) -> bool;
}

/// The drain observed a critical error; the driver must halt.
#[derive(Debug, thiserror::Error)]
#[error("critical error: {cause}")]
pub struct DrainHalt {
    /// The recorded cause.
    pub cause: String,
}

/// The synchronous event queue.
#[derive(Debug)]
pub struct EventSystem {
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Default for EventSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSystem {
    /// Creates an empty event system.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A new emitter into this system.
    pub fn emitter(&self) -> Emitter {
        Emitter { tx: self.tx.clone() }
    }

    /// Delivers queued events to the derivers, in order, until the queue is
    /// empty. Handlers may emit further events, which are processed within
    /// the same drain.
    ///
    /// A [`Event::CriticalError`] is still delivered to every deriver, and the
    /// drain completes before reporting the halt.
    pub async fn drain(&mut self, derivers: &mut [&mut dyn Deriver]) -> Result<(), DrainHalt> {
        let mut halt = None;
        while let Ok(ev) = self.rx.try_recv() {
            metrics::counter!(Metrics::EVENTS, "kind" => ev.kind()).increment(1);
            if let Event::CriticalError { cause } = &ev {
                halt.get_or_insert_with(|| cause.clone());
            }
            for deriver in derivers.iter_mut() {
                let handled = deriver.on_event(&ev).await;
                trace!(target: "events", event = %ev, deriver = deriver.name(), handled, "Dispatched event");
            }
        }
        match halt {
            Some(cause) => Err(DrainHalt { cause }),
            None => Ok(()),
        }
    }
}
