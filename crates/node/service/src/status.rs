//! The sync-status tracker.

use crate::{Deriver, Event, Metrics};
use async_trait::async_trait;
use cp_engine::HeadsSnapshot;
use cp_protocol::{L1BlockRef, SyncStatus};
use tokio::sync::watch;

/// Observes head-change events and maintains the [`SyncStatus`] snapshot.
///
/// The snapshot is published on a watch channel so RPC handlers can read it
/// from other tasks; every published value reflects all events dispatched
/// strictly before it.
#[derive(Debug)]
pub struct StatusTracker {
    status: SyncStatus,
    status_tx: watch::Sender<SyncStatus>,
}

impl StatusTracker {
    /// Creates the tracker seeded from the engine's initial heads.
    pub fn new(initial: HeadsSnapshot) -> (watch::Receiver<SyncStatus>, Self) {
        let mut status = SyncStatus::default();
        apply_heads(&mut status, &initial);
        let (status_tx, status_rx) = watch::channel(status);
        (status_rx, Self { status, status_tx })
    }

    /// The current snapshot.
    pub const fn sync_status(&self) -> SyncStatus {
        self.status
    }

    /// The latest observed base-layer head.
    pub const fn l1_head(&self) -> L1BlockRef {
        self.status.head_l1
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status);
    }
}

fn apply_heads(status: &mut SyncStatus, heads: &HeadsSnapshot) {
    status.unsafe_l2 = heads.unsafe_l2;
    status.cross_unsafe_l2 = heads.cross_unsafe_l2;
    status.pending_safe_l2 = heads.pending_safe_l2;
    status.safe_l2 = heads.safe_l2;
    status.finalized_l2 = heads.finalized_l2;
}

#[async_trait]
impl Deriver for StatusTracker {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn on_event(&mut self, ev: &Event) -> bool {
        match ev {
            Event::L1HeadUpdate(r) => {
                self.status.head_l1 = *r;
                metrics::gauge!(Metrics::L1_HEAD).set(r.number as f64);
            }
            Event::L1SafeUpdate(r) => self.status.safe_l1 = *r,
            Event::L1FinalizedUpdate(r) => self.status.finalized_l1 = *r,
            Event::ForkchoiceUpdated(heads) => {
                apply_heads(&mut self.status, heads);
                metrics::gauge!(Metrics::UNSAFE_HEAD).set(heads.unsafe_l2.number as f64);
                metrics::gauge!(Metrics::SAFE_HEAD).set(heads.safe_l2.number as f64);
            }
            Event::UnsafeQueueUpdated { queued, .. } => {
                self.status.queued_unsafe_payloads = *queued;
            }
            _ => return false,
        }
        self.publish();
        true
    }
}
