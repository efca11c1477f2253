//! The engine's heads view.

use cp_protocol::L2BlockRef;
use alloy_rpc_types_engine::ForkchoiceState;

/// A copy of every head tracked by the engine state, in safety order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadsSnapshot {
    /// The latest known head, possibly ahead of derivation.
    pub unsafe_l2: L2BlockRef,
    /// The unsafe head validated by the cross-chain safety check.
    pub cross_unsafe_l2: L2BlockRef,
    /// Attributes applied but not yet confirmed safe.
    pub pending_safe_l2: L2BlockRef,
    /// The head confirmed by derivation.
    pub safe_l2: L2BlockRef,
    /// The safe head derived from a finalized L1 block.
    pub finalized_l2: L2BlockRef,
}

impl HeadsSnapshot {
    /// Whether the heads satisfy the safety ordering
    /// `finalized <= safe <= pending_safe <= cross_unsafe <= unsafe`.
    pub const fn is_ordered(&self) -> bool {
        self.finalized_l2.number <= self.safe_l2.number
            && self.safe_l2.number <= self.pending_safe_l2.number
            && self.pending_safe_l2.number <= self.cross_unsafe_l2.number
            && self.cross_unsafe_l2.number <= self.unsafe_l2.number
    }
}

/// The consistent heads chosen by a reset-target computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetTarget {
    /// The unsafe head to keep.
    pub unsafe_head: L2BlockRef,
    /// The safe head to roll back to.
    pub safe_head: L2BlockRef,
    /// The finalized head.
    pub finalized_head: L2BlockRef,
}

/// The heads view of the execution engine, owned by the
/// [`crate::EngineController`].
///
/// Setters preserve the driver's head invariants: the finalized head never
/// retreats, the safe head only retreats through [`EngineState::force_reset`],
/// and the unsafe head only retreats when a reorg captures a backup.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    unsafe_head: L2BlockRef,
    cross_unsafe_head: L2BlockRef,
    pending_safe_head: L2BlockRef,
    safe_head: L2BlockRef,
    finalized_head: L2BlockRef,
    /// The previous unsafe head, retained to recover from a failed reorg.
    backup_unsafe_head: Option<L2BlockRef>,
    /// Whether the engine needs to be told about the current heads.
    forkchoice_update_needed: bool,
}

impl EngineState {
    /// Creates the state from the engine's reported heads.
    pub fn new(finalized: L2BlockRef, safe: L2BlockRef, unsafe_head: L2BlockRef) -> Self {
        Self {
            unsafe_head,
            cross_unsafe_head: unsafe_head,
            pending_safe_head: safe,
            safe_head: safe,
            finalized_head: finalized,
            backup_unsafe_head: None,
            forkchoice_update_needed: true,
        }
    }

    /// The current unsafe head.
    pub const fn unsafe_head(&self) -> L2BlockRef {
        self.unsafe_head
    }

    /// The current cross-unsafe head.
    pub const fn cross_unsafe_head(&self) -> L2BlockRef {
        self.cross_unsafe_head
    }

    /// The current pending-safe head.
    pub const fn pending_safe_head(&self) -> L2BlockRef {
        self.pending_safe_head
    }

    /// The current safe head.
    pub const fn safe_head(&self) -> L2BlockRef {
        self.safe_head
    }

    /// The current finalized head.
    pub const fn finalized_head(&self) -> L2BlockRef {
        self.finalized_head
    }

    /// The backup unsafe head, if a reorg captured one.
    pub const fn backup_unsafe_head(&self) -> Option<L2BlockRef> {
        self.backup_unsafe_head
    }

    /// Clears the backup unsafe head.
    pub fn clear_backup_unsafe_head(&mut self) {
        self.backup_unsafe_head = None;
    }

    /// Whether a forkchoice update is pending toward the engine.
    pub const fn forkchoice_update_needed(&self) -> bool {
        self.forkchoice_update_needed
    }

    /// Marks the pending forkchoice update as applied.
    pub fn mark_forkchoice_applied(&mut self) {
        self.forkchoice_update_needed = false;
    }

    /// The forkchoice state to send to the engine.
    pub const fn forkchoice_state(&self) -> ForkchoiceState {
        ForkchoiceState {
            head_block_hash: self.unsafe_head.hash,
            safe_block_hash: self.safe_head.hash,
            finalized_block_hash: self.finalized_head.hash,
        }
    }

    /// A copy of all tracked heads.
    pub const fn snapshot(&self) -> HeadsSnapshot {
        HeadsSnapshot {
            unsafe_l2: self.unsafe_head,
            cross_unsafe_l2: self.cross_unsafe_head,
            pending_safe_l2: self.pending_safe_head,
            safe_l2: self.safe_head,
            finalized_l2: self.finalized_head,
        }
    }

    /// Advances the unsafe head. A non-extending update captures the current
    /// head as the backup, so a failed reorg can be recovered.
    ///
    /// Without a cross-chain safety backend the cross-unsafe head follows the
    /// unsafe head.
    pub fn set_unsafe_head(&mut self, head: L2BlockRef) {
        if head != self.unsafe_head
            && head.parent_hash != self.unsafe_head.hash
            && head.number <= self.unsafe_head.number
        {
            self.backup_unsafe_head = Some(self.unsafe_head);
        }
        self.unsafe_head = head;
        self.cross_unsafe_head = head;
        self.forkchoice_update_needed = true;
    }

    /// Advances the pending-safe head.
    pub fn set_pending_safe_head(&mut self, head: L2BlockRef) {
        self.pending_safe_head = head;
    }

    /// Promotes the safe head. Refuses to retreat; retreats only happen
    /// through [`Self::force_reset`].
    pub fn promote_safe_head(&mut self, head: L2BlockRef) -> bool {
        if head.number < self.safe_head.number {
            return false;
        }
        self.safe_head = head;
        if self.pending_safe_head.number < head.number {
            self.pending_safe_head = head;
        }
        if self.unsafe_head.number < head.number {
            self.unsafe_head = head;
            self.cross_unsafe_head = head;
        }
        self.forkchoice_update_needed = true;
        true
    }

    /// Promotes the finalized head. Refuses to retreat and refuses to pass the
    /// safe head.
    pub fn promote_finalized_head(&mut self, head: L2BlockRef) -> bool {
        if head.number < self.finalized_head.number || head.number > self.safe_head.number {
            return false;
        }
        self.finalized_head = head;
        self.forkchoice_update_needed = true;
        true
    }

    /// Rolls every head to the reset target. The finalized head stays put if
    /// the target would move it backwards.
    pub fn force_reset(&mut self, target: &ResetTarget) {
        self.unsafe_head = target.unsafe_head;
        self.cross_unsafe_head = target.unsafe_head;
        self.pending_safe_head = target.safe_head;
        self.safe_head = target.safe_head;
        if target.finalized_head.number > self.finalized_head.number {
            self.finalized_head = target.finalized_head;
        }
        self.backup_unsafe_head = None;
        self.forkchoice_update_needed = true;
    }
}
