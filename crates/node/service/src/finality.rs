//! Finalization: maps derived safe blocks to the base-layer blocks that made
//! them safe.

use crate::{Deriver, Emitter, Event};
use async_trait::async_trait;
use cp_protocol::{L1BlockRef, L2BlockRef};
use std::collections::VecDeque;

/// The number of safe-derived records retained.
const FINALITY_LOOKBACK: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct FinalityData {
    safe: L2BlockRef,
    derived_from: L1BlockRef,
}

/// Tracks which base-layer block completed each safe block's derivation, and
/// promotes safe blocks to finalized when their deriving block finalizes.
///
/// Finalization is strictly signal-driven: promotion only happens on a
/// base-layer finalized signal.
#[derive(Debug)]
pub struct FinalityDeriver {
    emitter: Emitter,
    finalized_l1: L1BlockRef,
    queue: VecDeque<FinalityData>,
    last_promoted: u64,
}

impl FinalityDeriver {
    /// Creates the finalizer.
    pub fn new(emitter: Emitter) -> Self {
        Self {
            emitter,
            finalized_l1: L1BlockRef::default(),
            queue: VecDeque::new(),
            last_promoted: 0,
        }
    }

    /// The latest observed finalized base-layer block.
    pub const fn finalized_l1(&self) -> L1BlockRef {
        self.finalized_l1
    }

    fn on_safe_derived(&mut self, safe: L2BlockRef, derived_from: L1BlockRef) {
        if self.queue.back().is_some_and(|last| last.safe.number >= safe.number) {
            // A re-derivation after reset supersedes the old records.
            self.queue.retain(|d| d.safe.number < safe.number);
        }
        if self.queue.len() == FINALITY_LOOKBACK {
            self.queue.pop_front();
        }
        self.queue.push_back(FinalityData { safe, derived_from });
    }

    fn on_l1_finalized(&mut self, finalized: L1BlockRef) {
        if finalized.number < self.finalized_l1.number {
            warn!(
                target: "finalizer",
                old = %self.finalized_l1,
                new = %finalized,
                "Ignoring non-monotone L1 finalized signal"
            );
            return;
        }
        self.finalized_l1 = finalized;

        let candidate = self
            .queue
            .iter()
            .filter(|d| d.derived_from.number <= finalized.number)
            .max_by_key(|d| d.safe.number)
            .map(|d| d.safe);
        let Some(safe) = candidate else { return };
        if safe.number <= self.last_promoted {
            return;
        }

        info!(target: "finalizer", l2 = %safe, l1 = %finalized, "Promoting finalized block");
        self.last_promoted = safe.number;
        self.queue.retain(|d| d.safe.number > safe.number);
        self.emitter.emit(Event::PromoteFinalized(safe));
    }
}

#[async_trait]
impl Deriver for FinalityDeriver {
    fn name(&self) -> &'static str {
        "finalizer"
    }

    async fn on_event(&mut self, ev: &Event) -> bool {
        match ev {
            Event::SafeDerived { safe, derived_from } => {
                self.on_safe_derived(*safe, *derived_from)
            }
            Event::L1FinalizedUpdate(finalized) => self.on_l1_finalized(*finalized),
            Event::EngineResetConfirmed { .. } => self.queue.clear(),
            _ => return false,
        }
        true
    }
}
