//! # Snapshot stack
//!
//! Time travel for the editor: a strictly time-ordered sequence of full
//! state captures (scene + selection + tool state), with an "active time"
//! cursor that undo/redo moves along the sequence. Old entries are evicted
//! oldest-first once the stack outgrows its memory budget; the entry at the
//! active time is never evicted.
//!
//! Jumping back from unsaved work first records a *transient* snapshot of
//! the present, so a redo can return to it. The transient entry is dropped
//! as soon as a regular snapshot is taken.

use crate::config::Technology;
use crate::scene::{GizmoState, Scene, Selection};

bitflags::bitflags! {
    /// Ancillary UI state remembered alongside a snapshot.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SnapshotFlags: u32 {
        /// A layer-editing tool was active when the snapshot was taken.
        const LAYER_EDITING_ACTIVE = 1;
        /// A settings item was selected on the sidebar.
        const SELECTED_SETTINGS_ON_SIDEBAR = 1 << 1;
        /// A layer-range item was selected on the sidebar.
        const SELECTED_LAYER_ON_SIDEBAR = 1 << 2;
        /// Supports must be recalculated after loading this snapshot.
        const RECALCULATE_SUPPORTS = 1 << 3;
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SnapshotData {
    pub flags: SnapshotFlags,
    /// Compute mode active at capture time. Restoring a snapshot taken
    /// under the other mode requires caller confirmation first.
    pub technology: Technology,
    pub layer_range_idx: Option<usize>,
}
impl SnapshotData {
    #[must_use]
    pub fn new(technology: Technology) -> Self {
        Self {
            flags: SnapshotFlags::empty(),
            technology,
            layer_range_idx: None,
        }
    }
}

/// Borrowed view of everything a snapshot captures.
#[derive(Copy, Clone)]
pub struct Capture<'a> {
    pub scene: &'a Scene,
    pub selection: &'a Selection,
    pub gizmos: &'a GizmoState,
}
impl Capture<'_> {
    fn matches(&self, snapshot: &Snapshot) -> bool {
        *self.scene == snapshot.scene
            && *self.selection == snapshot.selection
            && *self.gizmos == snapshot.gizmos
    }
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    timestamp: u64,
    label: String,
    scene: Scene,
    selection: Selection,
    gizmos: GizmoState,
    pub data: SnapshotData,
}
impl Snapshot {
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
    #[must_use]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }
    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }
    #[must_use]
    pub fn gizmos(&self) -> &GizmoState {
        &self.gizmos
    }
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.label == Stack::TRANSIENT_LABEL
    }
    #[must_use]
    pub fn memsize(&self) -> usize {
        self.scene.memsize() + self.label.len() + self.gizmos.payload.len() + 64
    }
}

pub struct Stack {
    snapshots: Vec<Snapshot>,
    /// Timestamp of the snapshot the editor state currently corresponds to.
    active_time: u64,
    clock: u64,
    budget: usize,
}
impl Stack {
    /// Label of the implicit present-state snapshot. Never shown to the user.
    pub const TRANSIENT_LABEL: &'static str = "@present@";

    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            snapshots: Vec::new(),
            active_time: 0,
            clock: 0,
            budget,
        }
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }
    #[must_use]
    pub fn active_snapshot_time(&self) -> u64 {
        self.active_time
    }
    /// Position of the active snapshot in the ordered sequence.
    #[must_use]
    pub fn active_index(&self) -> Option<usize> {
        self.snapshots
            .binary_search_by_key(&self.active_time, Snapshot::timestamp)
            .ok()
    }
    #[must_use]
    pub fn index_of(&self, timestamp: u64) -> Option<usize> {
        self.snapshots
            .binary_search_by_key(&timestamp, Snapshot::timestamp)
            .ok()
    }
    #[must_use]
    pub fn has_undo_snapshot(&self) -> bool {
        self.active_index().is_some_and(|i| i > 0)
    }
    #[must_use]
    pub fn has_redo_snapshot(&self) -> bool {
        self.active_index()
            .is_some_and(|i| i + 1 < self.snapshots.len())
    }
    #[must_use]
    pub fn memsize(&self) -> usize {
        self.snapshots.iter().map(Snapshot::memsize).sum()
    }

    /// Capture the current state. Discards any redo tail beyond the active
    /// time, and any leftover transient entry.
    pub fn take_snapshot(&mut self, label: &str, capture: Capture<'_>, data: SnapshotData) {
        if self.snapshots.last().is_some_and(Snapshot::is_transient) {
            self.snapshots.pop();
        }
        // History is linear: capturing in the middle drops the future.
        self.snapshots.retain(|s| s.timestamp <= self.active_time);
        self.clock += 1;
        self.snapshots.push(Snapshot {
            timestamp: self.clock,
            label: label.to_owned(),
            scene: capture.scene.clone(),
            selection: capture.selection.clone(),
            gizmos: capture.gizmos.clone(),
            data,
        });
        self.active_time = self.clock;
        self.release_least_recently_used();
        log::info!(
            "snapshot taken: {label}, stack memory: {} bytes",
            self.memsize()
        );
    }

    /// Move the cursor back to `timestamp` and hand out the snapshot to
    /// restore from. When leaving unsaved present state, a transient
    /// snapshot of it is recorded first so redo can return.
    pub fn undo(
        &mut self,
        timestamp: u64,
        capture: Capture<'_>,
        top_data: SnapshotData,
    ) -> Option<&Snapshot> {
        let idx = self.index_of(timestamp)?;
        if self.active_index() == Some(self.snapshots.len() - 1)
            && self
                .snapshots
                .last()
                .is_some_and(|top| !top.is_transient() && !capture.matches(top))
        {
            self.clock += 1;
            self.snapshots.push(Snapshot {
                timestamp: self.clock,
                label: Self::TRANSIENT_LABEL.to_owned(),
                scene: capture.scene.clone(),
                selection: capture.selection.clone(),
                gizmos: capture.gizmos.clone(),
                data: top_data,
            });
        }
        self.active_time = timestamp;
        Some(&self.snapshots[idx])
    }

    /// Move the cursor forward to `timestamp`.
    pub fn redo(&mut self, timestamp: u64) -> Option<&Snapshot> {
        let idx = self.index_of(timestamp)?;
        self.active_time = timestamp;
        Some(&self.snapshots[idx])
    }

    /// Evict oldest-first until under the memory budget. The active entry
    /// is exempt.
    pub fn release_least_recently_used(&mut self) {
        while self.memsize() > self.budget {
            let Some(idx) = self
                .snapshots
                .iter()
                .position(|s| s.timestamp != self.active_time)
            else {
                break;
            };
            let evicted = self.snapshots.remove(idx);
            log::trace!(
                "evicted snapshot {} ({} bytes)",
                evicted.label,
                evicted.memsize()
            );
        }
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.active_time = 0;
    }
}
