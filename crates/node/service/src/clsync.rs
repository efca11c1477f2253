//! The CL-sync queue: orders received unsafe payloads and feeds the engine.

use crate::{Deriver, Emitter, Event, Metrics};
use async_trait::async_trait;
use cp_protocol::{ExecutionPayloadEnvelope, L2BlockRef, RollupConfig};
use std::{collections::BTreeMap, sync::Arc};

/// The maximum number of payloads held in the queue.
pub const MAX_QUEUED_UNSAFE_PAYLOADS: usize = 512;

#[derive(Debug, Clone)]
struct QueuedPayload {
    envelope: Arc<ExecutionPayloadEnvelope>,
    block_ref: L2BlockRef,
}

/// Buffers unsafe payloads by number until the unsafe head catches up, then
/// releases the next contiguous payload toward the engine.
///
/// Payloads at or below the unsafe head are rejected on receipt and evicted
/// on head advance. Deduplication is by `(number, hash)`; conflicting payloads
/// at the same height are all kept and the engine arbitrates.
#[derive(Debug)]
pub struct CLSyncDeriver {
    emitter: Emitter,
    cfg: Arc<RollupConfig>,
    queue: BTreeMap<u64, Vec<QueuedPayload>>,
    queued: usize,
    unsafe_head: L2BlockRef,
}

impl CLSyncDeriver {
    /// Creates the queue, tracking gaps relative to `unsafe_head`.
    pub fn new(emitter: Emitter, cfg: Arc<RollupConfig>, unsafe_head: L2BlockRef) -> Self {
        Self { emitter, cfg, queue: BTreeMap::new(), queued: 0, unsafe_head }
    }

    /// The lowest queued unsafe block, used by the gap detector.
    pub fn lowest_queued_unsafe_block(&self) -> Option<L2BlockRef> {
        self.queue.values().next().and_then(|v| v.first()).map(|q| q.block_ref)
    }

    /// The number of queued payloads.
    pub fn len(&self) -> usize {
        self.queued
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    fn receive(&mut self, envelope: &Arc<ExecutionPayloadEnvelope>) {
        let block_ref = match envelope.to_l2_block_ref(&self.cfg.genesis) {
            Ok(r) => r,
            Err(err) => {
                warn!(target: "clsync", id = %envelope.id(), %err, "Dropping undecodable unsafe payload");
                return;
            }
        };
        if block_ref.number <= self.unsafe_head.number {
            debug!(target: "clsync", id = %envelope.id(), head = %self.unsafe_head, "Dropping stale unsafe payload");
            return;
        }

        if self
            .queue
            .get(&block_ref.number)
            .is_some_and(|entries| entries.iter().any(|q| q.block_ref.hash == block_ref.hash))
        {
            return;
        }

        if self.queued >= MAX_QUEUED_UNSAFE_PAYLOADS {
            // Prefer keeping the lower end of the queue: it unblocks the head.
            let highest = *self.queue.keys().next_back().expect("queue is non-empty");
            if block_ref.number >= highest {
                debug!(target: "clsync", id = %envelope.id(), "Unsafe payload queue full, dropping");
                return;
            }
            if let Some(evicted) = self.queue.remove(&highest) {
                self.queued -= evicted.len();
            }
        }

        self.queue
            .entry(block_ref.number)
            .or_default()
            .push(QueuedPayload { envelope: envelope.clone(), block_ref });
        self.queued += 1;
        self.publish_queue_state();
        self.try_promote();
    }

    fn on_forkchoice_updated(&mut self, unsafe_head: L2BlockRef) {
        if unsafe_head == self.unsafe_head {
            return;
        }
        self.unsafe_head = unsafe_head;
        let retained = self.queue.split_off(&(unsafe_head.number + 1));
        let evicted: usize = self.queue.values().map(Vec::len).sum();
        self.queue = retained;
        if evicted > 0 {
            self.queued -= evicted;
            self.publish_queue_state();
        }
        self.try_promote();
    }

    /// Releases the next payload when it directly extends the unsafe head.
    fn try_promote(&mut self) {
        let next_number = self.unsafe_head.number + 1;
        let Some(entries) = self.queue.get_mut(&next_number) else {
            return;
        };
        // Prefer the payload that names the current head as its parent.
        let idx = entries
            .iter()
            .position(|q| q.block_ref.parent_hash == self.unsafe_head.hash)
            .unwrap_or(0);
        let next = entries.remove(idx);
        if entries.is_empty() {
            self.queue.remove(&next_number);
        }
        self.queued -= 1;

        info!(target: "clsync", id = %next.block_ref, "Releasing queued unsafe payload toward engine");
        self.emitter.emit(Event::ProcessUnsafePayload {
            envelope: next.envelope,
            block_ref: next.block_ref,
        });
        self.publish_queue_state();
    }

    fn publish_queue_state(&self) {
        metrics::gauge!(Metrics::UNSAFE_PAYLOADS_QUEUED).set(self.queued as f64);
        self.emitter.emit(Event::UnsafeQueueUpdated {
            queued: self.queued as u64,
            lowest: self.lowest_queued_unsafe_block(),
        });
    }
}

#[async_trait]
impl Deriver for CLSyncDeriver {
    fn name(&self) -> &'static str {
        "cl-sync"
    }

    async fn on_event(&mut self, ev: &Event) -> bool {
        match ev {
            Event::ReceivedUnsafePayload(envelope) => self.receive(envelope),
            Event::ForkchoiceUpdated(heads) => self.on_forkchoice_updated(heads.unsafe_l2),
            _ => return false,
        }
        true
    }
}
