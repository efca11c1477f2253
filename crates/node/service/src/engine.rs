//! The engine deriver: translates events into engine-controller calls.

use crate::{Deriver, Emitter, Event, Metrics};
use async_trait::async_trait;
use cp_engine::{
    EngineController, EngineControllerError, EngineErrorSeverity, HeadsSnapshot,
};
use cp_protocol::{AttributesWithParent, BlockId, ExecutionPayloadEnvelope, L2BlockRef};
use std::sync::Arc;
use tokio::sync::watch;

/// What the rest of the driver observes of the engine between events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStateSnapshot {
    /// The tracked heads.
    pub heads: HeadsSnapshot,
    /// Whether the execution engine is syncing.
    pub is_syncing: bool,
}

/// Owns the [`EngineController`] and bridges it onto the event system.
///
/// Every head mutation publishes a state snapshot on a watch channel and,
/// when the heads changed, emits [`Event::ForkchoiceUpdated`].
#[derive(Debug)]
pub struct EngineDeriver {
    controller: EngineController,
    emitter: Emitter,
    state_tx: watch::Sender<EngineStateSnapshot>,
    last_published: HeadsSnapshot,
}

impl EngineDeriver {
    /// Creates the deriver and its observation channel.
    pub fn new(
        controller: EngineController,
        emitter: Emitter,
    ) -> (watch::Receiver<EngineStateSnapshot>, Self) {
        let snapshot = EngineStateSnapshot {
            heads: controller.snapshot(),
            is_syncing: controller.is_syncing(),
        };
        let (state_tx, state_rx) = watch::channel(snapshot);
        let last_published = snapshot.heads;
        (state_rx, Self { controller, emitter, state_tx, last_published })
    }

    /// The current unsafe head.
    pub const fn unsafe_l2_head(&self) -> L2BlockRef {
        self.controller.unsafe_l2_head()
    }

    /// Whether the execution engine is syncing.
    pub const fn is_syncing(&self) -> bool {
        self.controller.is_syncing()
    }

    /// Inserts an unsafe payload outside the event path. Used by the EL-sync
    /// batch loader, which owns its own error handling.
    pub async fn insert_unsafe_payload_direct(
        &mut self,
        envelope: &ExecutionPayloadEnvelope,
        block_ref: L2BlockRef,
    ) -> Result<(), EngineControllerError> {
        let outcome = self.controller.insert_unsafe_payload(envelope, block_ref).await?;
        self.publish();
        if outcome.el_sync_finished {
            info!(target: "engine", "Execution-layer sync complete");
            self.emitter.emit(Event::Reset {
                cause: "execution-layer sync complete, starting derivation".to_string(),
            });
        }
        Ok(())
    }

    /// Publishes the current state, emitting a forkchoice event if the heads
    /// moved.
    fn publish(&mut self) {
        let snapshot = EngineStateSnapshot {
            heads: self.controller.snapshot(),
            is_syncing: self.controller.is_syncing(),
        };
        self.state_tx.send_replace(snapshot);
        if snapshot.heads != self.last_published {
            self.last_published = snapshot.heads;
            self.emitter.emit(Event::ForkchoiceUpdated(snapshot.heads));
        }
    }

    /// Routes a controller error into the event taxonomy.
    fn emit_error(&self, err: EngineControllerError) {
        match err.severity() {
            EngineErrorSeverity::TemporaryEngine => {
                self.emitter.emit(Event::TemporaryEngineError { cause: err.to_string() })
            }
            EngineErrorSeverity::TemporaryL1 => {
                self.emitter.emit(Event::TemporaryL1Error { cause: err.to_string() })
            }
            EngineErrorSeverity::InvalidPayload => {
                let id = match &err {
                    EngineControllerError::InvalidPayload(id) => *id,
                    _ => BlockId::default(),
                };
                metrics::counter!(Metrics::DERIVATION_ERRORS).increment(1);
                self.emitter.emit(Event::InvalidPayload { id, cause: err.to_string() });
                // Invalid payloads are retried through backoff-paced steps.
                self.emitter.emit(Event::TemporaryEngineError { cause: err.to_string() });
            }
            EngineErrorSeverity::Reset => self.emitter.emit(Event::Reset { cause: err.to_string() }),
            EngineErrorSeverity::Critical => {
                self.emitter.emit(Event::CriticalError { cause: err.to_string() })
            }
        }
    }

    async fn on_try_update_engine(&mut self) {
        match self.controller.try_update_forkchoice().await {
            Ok(true) => self.publish(),
            Ok(false) => {}
            Err(err) => self.emit_error(err),
        }
    }

    async fn on_try_backup_unsafe_reorg(&mut self) {
        match self.controller.try_backup_unsafe_reorg().await {
            Ok(true) => self.publish(),
            Ok(false) => {}
            Err(err) => self.emit_error(err),
        }
    }

    async fn on_process_unsafe_payload(
        &mut self,
        envelope: &Arc<ExecutionPayloadEnvelope>,
        block_ref: L2BlockRef,
    ) {
        if let Err(err) = self.insert_unsafe_payload_direct(envelope, block_ref).await {
            self.emit_error(err);
        }
    }

    /// Applies derived attributes: consolidate against an existing unsafe
    /// block when possible, otherwise force a build through the engine.
    async fn on_derived_attributes(&mut self, attrs: &AttributesWithParent) {
        let pending = self.controller.pending_safe_l2_head();
        if attrs.parent.hash != pending.hash {
            debug!(
                target: "engine",
                parent = %attrs.parent,
                pending = %pending,
                "Dropping stale derived attributes"
            );
            self.emitter.emit(Event::StepReq);
            return;
        }

        // When the unsafe chain already extends past the pending safe head,
        // check whether the canonical block matches the attributes. A match
        // promotes it without re-execution; a mismatch forces a reorg build.
        if self.controller.unsafe_l2_head().number > pending.number {
            match self.controller.canonical_ref_by_number(pending.number + 1).await {
                Ok(existing)
                    if existing.parent_hash == attrs.parent.hash
                        && existing.timestamp == attrs.attributes.timestamp =>
                {
                    debug!(target: "engine", block = %existing, "Consolidated unsafe block as safe");
                    self.controller.adopt_safe_head(existing);
                    self.publish();
                    self.emit_safe_derived(existing, attrs);
                    self.emitter.emit(Event::TryUpdateEngine);
                    return;
                }
                Ok(existing) => {
                    warn!(
                        target: "engine",
                        existing = %existing,
                        "Unsafe block inconsistent with derived attributes, reorging"
                    );
                }
                Err(err) => {
                    self.emit_error(err);
                    return;
                }
            }
        }

        match self.controller.build_payload(attrs).await {
            Ok((_, block_ref)) => {
                self.publish();
                self.emit_safe_derived(block_ref, attrs);
            }
            Err(err) => self.emit_error(err),
        }
    }

    fn emit_safe_derived(&self, safe: L2BlockRef, attrs: &AttributesWithParent) {
        if let Some(derived_from) = attrs.derived_from {
            self.emitter.emit(Event::SafeDerived { safe, derived_from });
        }
    }

    async fn on_build_payload(&mut self, attrs: &AttributesWithParent) {
        match self.controller.build_payload(attrs).await {
            Ok((envelope, block_ref)) => {
                self.publish();
                self.emitter
                    .emit(Event::PayloadSealed { envelope: Arc::new(envelope), block_ref });
            }
            Err(err) => self.emit_error(err),
        }
    }

    fn on_promote_finalized(&mut self, block_ref: L2BlockRef) {
        if self.controller.promote_finalized(block_ref) {
            self.publish();
            self.emitter.emit(Event::TryUpdateEngine);
        }
    }

    async fn on_reset_engine_request(&mut self) {
        match self.controller.compute_reset_target().await {
            Ok(target) => {
                self.controller.apply_reset(&target);
                self.publish();
                self.emitter.emit(Event::EngineResetConfirmed { heads: target });
            }
            Err(err) => self.emit_error(err),
        }
    }
}

#[async_trait]
impl Deriver for EngineDeriver {
    fn name(&self) -> &'static str {
        "engine"
    }

    async fn on_event(&mut self, ev: &Event) -> bool {
        match ev {
            Event::TryUpdateEngine => self.on_try_update_engine().await,
            Event::TryBackupUnsafeReorg => self.on_try_backup_unsafe_reorg().await,
            Event::ProcessUnsafePayload { envelope, block_ref } => {
                self.on_process_unsafe_payload(envelope, *block_ref).await
            }
            Event::DerivedAttributes(attrs) => self.on_derived_attributes(attrs).await,
            Event::BuildPayload(attrs) => self.on_build_payload(attrs).await,
            Event::PromoteFinalized(block_ref) => self.on_promote_finalized(*block_ref),
            Event::ResetEngineRequest => self.on_reset_engine_request().await,
            _ => return false,
        }
        true
    }
}
