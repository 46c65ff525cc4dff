//! # Workbench
//!
//! The facade the UI drives: owns the scene and selection, both undo
//! stacks, the job group and the background process, and keeps their
//! protocols straight. Everything here runs on the interactive thread;
//! worker results only land through [`Self::tick`].

use std::time::Instant;

use bedlam_core::config::{Config, Technology};
use bedlam_core::scene::{GizmoState, Scene, Selection};
use bedlam_core::snapshot::{Capture, Snapshot, SnapshotData, SnapshotFlags, Stack};
use strum::EnumCount as _;

use crate::jobs::arrange::{ArrangeJob, ArrangeScope};
use crate::jobs::group::{JobGroup, JobRequest};
use crate::jobs::JobContext;
use crate::process::{BackgroundProcess, ProcessEvent, Processor, UpdateFlags};
use crate::Host;

/// Which history is live. The gizmo stack only exists inside a tool
/// session; the two are never active together.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ActiveStack {
    Main,
    Gizmos,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ExportError {
    #[error("the current scene cannot be processed")]
    Invalid,
    #[error("a background job is still running")]
    Busy,
}

pub struct Workbench {
    scene: Scene,
    selection: Selection,
    gizmos: GizmoState,
    config: Config,
    process: BackgroundProcess,
    jobs: JobGroup,
    stack_main: Stack,
    stack_gizmos: Stack,
    active_stack: ActiveStack,
    /// Reference-counted "don't snapshot" scopes.
    prevent_snapshots: u32,
    /// Last active printer profile per technology, restored when a history
    /// jump switches technologies.
    last_profile: [String; Technology::COUNT],
    host: Box<dyn Host>,
}

impl Workbench {
    #[must_use]
    pub fn new(
        config: Config,
        host: Box<dyn Host>,
        backend: Box<dyn Processor>,
        snapshot_budget: usize,
    ) -> Self {
        let last_profile = std::array::from_fn(|_| config.printer_profile.clone());
        Self {
            scene: Scene::default(),
            selection: Selection::default(),
            gizmos: GizmoState::default(),
            config,
            process: BackgroundProcess::new(backend),
            jobs: JobGroup::new(),
            stack_main: Stack::new(snapshot_budget),
            stack_gizmos: Stack::new(snapshot_budget),
            active_stack: ActiveStack::Main,
            prevent_snapshots: 0,
            last_profile,
            host,
        }
    }

    #[must_use]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }
    /// Mutable scene access. The caller ends an edit batch with
    /// [`Self::scene_edited`].
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }
    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }
    pub fn selection_mut(&mut self) -> &mut Selection {
        &mut self.selection
    }
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }
    #[must_use]
    pub fn jobs(&self) -> &JobGroup {
        &self.jobs
    }

    fn active(&self) -> &Stack {
        match self.active_stack {
            ActiveStack::Main => &self.stack_main,
            ActiveStack::Gizmos => &self.stack_gizmos,
        }
    }
    fn active_mut(&mut self) -> &mut Stack {
        match self.active_stack {
            ActiveStack::Main => &mut self.stack_main,
            ActiveStack::Gizmos => &mut self.stack_gizmos,
        }
    }

    /// Enter a scope during which `take_snapshot` is a no-op. Scopes nest;
    /// snapshots resume once every scope has exited.
    pub fn suppress_snapshots(&mut self) {
        self.prevent_snapshots += 1;
    }
    pub fn allow_snapshots(&mut self) {
        debug_assert!(self.prevent_snapshots > 0, "unbalanced allow_snapshots");
        self.prevent_snapshots = self.prevent_snapshots.saturating_sub(1);
    }

    fn snapshot_data(&self) -> SnapshotData {
        let mut flags = SnapshotFlags::empty();
        if self.gizmos.active.is_some() {
            flags |= SnapshotFlags::LAYER_EDITING_ACTIVE;
        }
        SnapshotData {
            flags,
            technology: self.config.technology,
            layer_range_idx: None,
        }
    }

    pub fn take_snapshot(&mut self, label: &str) {
        if self.prevent_snapshots > 0 {
            return;
        }
        let data = self.snapshot_data();
        let capture = Capture {
            scene: &self.scene,
            selection: &self.selection,
            gizmos: &self.gizmos,
        };
        let stack = match self.active_stack {
            ActiveStack::Main => &mut self.stack_main,
            ActiveStack::Gizmos => &mut self.stack_gizmos,
        };
        stack.take_snapshot(label, capture, data);
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.active().has_undo_snapshot()
    }
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.active().has_redo_snapshot()
    }
    /// Label for the history menu, `offset` entries away from the active
    /// one (negative toward undo).
    #[must_use]
    pub fn history_label(&self, offset: isize) -> Option<&str> {
        let stack = self.active();
        let idx = isize::try_from(stack.active_index()?).ok()? + offset;
        let idx = usize::try_from(idx).ok()?;
        stack.snapshots().get(idx).map(Snapshot::label)
    }

    pub fn undo(&mut self) -> bool {
        let stack = self.active();
        let Some(idx) = stack.active_index() else {
            return false;
        };
        if idx == 0 {
            return false;
        }
        let target = stack.snapshots()[idx - 1].timestamp();
        self.undo_redo_to(target)
    }
    pub fn redo(&mut self) -> bool {
        let stack = self.active();
        let Some(idx) = stack.active_index() else {
            return false;
        };
        let Some(next) = stack.snapshots().get(idx + 1) else {
            return false;
        };
        let target = next.timestamp();
        self.undo_redo_to(target)
    }

    /// Jump to an arbitrary point of the active history. Switching
    /// technologies asks the host first; declining aborts the whole jump
    /// with nothing changed.
    pub fn undo_redo_to(&mut self, timestamp: u64) -> bool {
        let (target_technology, active_time) = {
            let stack = self.active();
            let Some(idx) = stack.index_of(timestamp) else {
                return false;
            };
            (
                stack.snapshots()[idx].data.technology,
                stack.active_snapshot_time(),
            )
        };
        if timestamp == active_time {
            return true;
        }
        if target_technology != self.config.technology {
            let profile = self.last_profile[target_technology.index()].clone();
            if !self
                .host
                .confirm_technology_switch(target_technology, &profile)
            {
                return false;
            }
        }

        let data = self.snapshot_data();
        let restored = {
            let capture = Capture {
                scene: &self.scene,
                selection: &self.selection,
                gizmos: &self.gizmos,
            };
            let stack = match self.active_stack {
                ActiveStack::Main => &mut self.stack_main,
                ActiveStack::Gizmos => &mut self.stack_gizmos,
            };
            let snapshot = if timestamp > active_time {
                stack.redo(timestamp)
            } else {
                stack.undo(timestamp, capture, data)
            };
            snapshot.map(|s| {
                (
                    s.scene().clone(),
                    s.selection().clone(),
                    s.gizmos().clone(),
                    s.data.technology,
                )
            })
        };
        let Some((scene, selection, gizmos, technology)) = restored else {
            return false;
        };
        self.scene = scene;
        self.selection = selection;
        self.gizmos = gizmos;
        self.active_mut().release_least_recently_used();
        if technology != self.config.technology {
            self.last_profile[self.config.technology.index()] = self.config.printer_profile.clone();
            self.config.technology = technology;
            self.config.printer_profile = self.last_profile[technology.index()].clone();
        }
        // Validation errors from the restored state queue up instead of
        // popping dialogs mid-reload.
        let flags = self
            .process
            .update(&self.scene, &self.config, &*self.host, false, true);
        let busy = self.jobs.is_any_running();
        self.process.restart(flags, busy);
        self.host.refresh_scene();
        true
    }

    /// Open the isolated history for a short-lived tool session. Only
    /// valid while the main history is active.
    pub fn enter_gizmo_session(&mut self, label: &str) -> bool {
        if self.active_stack != ActiveStack::Main {
            return false;
        }
        self.stack_gizmos.clear();
        self.active_stack = ActiveStack::Gizmos;
        self.take_snapshot(label);
        true
    }
    /// Close the tool session, dropping its history.
    pub fn leave_gizmo_session(&mut self) {
        if self.active_stack != ActiveStack::Gizmos {
            return;
        }
        self.stack_gizmos.clear();
        self.active_stack = ActiveStack::Main;
    }

    /// Called after a batch of scene edits. Resin mode recomputes straight
    /// away; filament mode coalesces bursts through the debounce timer.
    pub fn scene_edited(&mut self) {
        match self.config.technology {
            Technology::Fdm => self.process.schedule_update(Instant::now()),
            Technology::Sla => self.update_background_process(false),
        }
    }
    fn update_background_process(&mut self, force_validation: bool) {
        let flags = self
            .process
            .update(&self.scene, &self.config, &*self.host, force_validation, false);
        let busy = self.jobs.is_any_running();
        self.process.restart(flags, busy);
    }

    /// Flush whatever was waiting for the window to come back to the
    /// foreground.
    pub fn on_activated(&mut self) {
        if let Some(message) = self.process.take_delayed_error() {
            self.host.show_error(&message);
        }
    }

    /// Forced validation and backend start for an export or print.
    pub fn start_export(&mut self) -> Result<(), ExportError> {
        if self.jobs.is_any_running() {
            return Err(ExportError::Busy);
        }
        let flags = self
            .process
            .update(&self.scene, &self.config, &*self.host, true, false);
        if flags.contains(UpdateFlags::INVALID) {
            return Err(ExportError::Invalid);
        }
        self.process.restart(flags | UpdateFlags::FORCE_EXPORT, false);
        Ok(())
    }

    pub fn arrange(&mut self, scope: ArrangeScope) -> bool {
        self.take_snapshot("Arrange");
        self.start_job(JobRequest::Arrange(scope))
    }
    pub fn optimize_rotation(&mut self) -> bool {
        self.take_snapshot("Optimize orientation");
        self.start_job(JobRequest::Orient)
    }
    fn start_job(&mut self, request: JobRequest) -> bool {
        let ctx = JobContext {
            scene: &self.scene,
            selection: &self.selection,
            config: &self.config,
        };
        let process = &mut self.process;
        self.jobs.start(request, &ctx, || process.stop())
    }

    /// Interactive-thread pump: debounce deadline, job completions,
    /// progress and backend events. The host calls this every frame.
    pub fn tick(&mut self, now: Instant) {
        if self.process.poll_timer(now) {
            self.update_background_process(false);
        }
        let refresh = self.jobs.finalize_pending(&mut self.scene, &self.config);
        if !self.jobs.arrange_slot().is_running() {
            if let Some(warning) = self.jobs.arrange_slot().with_job(ArrangeJob::take_warning) {
                self.host.show_warning(&warning);
            }
        }
        if refresh {
            self.host.refresh_scene();
            self.update_background_process(false);
        }
        for report in self.jobs.drain_progress() {
            self.host.report_status(report.percent, &report.status);
        }
        while let Some(event) = self.process.pop_event() {
            match event {
                ProcessEvent::CompletedWithCancellation => {
                    self.host.report_status(100, "Processing canceled");
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bedlam_core::scene::testing::cube_object;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct TestHost(std::sync::Arc<TestHostState>);
    #[derive(Default)]
    struct TestHostState {
        active: AtomicBool,
        confirm: AtomicBool,
        refreshes: AtomicU32,
        errors: parking_lot::Mutex<Vec<String>>,
        warnings: parking_lot::Mutex<Vec<String>>,
    }
    impl Host for TestHost {
        fn is_active(&self) -> bool {
            self.0.active.load(Ordering::Relaxed)
        }
        fn show_error(&self, message: &str) {
            self.0.errors.lock().push(message.to_owned());
        }
        fn show_warning(&self, message: &str) {
            self.0.warnings.lock().push(message.to_owned());
        }
        fn report_status(&self, _percent: i32, _message: &str) {}
        fn confirm_technology_switch(&self, _technology: Technology, _profile: &str) -> bool {
            self.0.confirm.load(Ordering::Relaxed)
        }
        fn refresh_scene(&self) {
            self.0.refreshes.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct NoopProcessor;
    impl Processor for NoopProcessor {
        fn start(&mut self) -> bool {
            true
        }
        fn stop(&mut self) {}
        fn is_running(&self) -> bool {
            false
        }
        fn is_finished(&self) -> bool {
            false
        }
    }

    fn bench(host: &TestHost) -> Workbench {
        Workbench::new(
            Config::default(),
            Box::new(host.clone()),
            Box::new(NoopProcessor),
            1 << 30,
        )
    }

    #[test]
    fn suppression_scopes_nest() {
        let host = TestHost::default();
        let mut wb = bench(&host);
        wb.take_snapshot("one");
        assert_eq!(wb.stack_main.snapshots().len(), 1);

        wb.suppress_snapshots();
        wb.suppress_snapshots();
        wb.take_snapshot("hidden");
        assert_eq!(wb.stack_main.snapshots().len(), 1);
        wb.allow_snapshots();
        wb.take_snapshot("still hidden");
        assert_eq!(wb.stack_main.snapshots().len(), 1);
        wb.allow_snapshots();
        wb.take_snapshot("two");
        assert_eq!(wb.stack_main.snapshots().len(), 2);
    }

    #[test]
    fn undo_and_redo_round_trip() {
        let host = TestHost::default();
        let mut wb = bench(&host);
        wb.scene_mut().add_object(cube_object(10.0, 1, 0.0));
        wb.take_snapshot("loaded");
        let loaded = wb.scene().clone();

        wb.scene_mut().objects[0].instances[0]
            .transform
            .translation
            .x = 55.0;
        wb.take_snapshot("moved");
        let moved = wb.scene().clone();

        // Unsaved edit on top.
        wb.scene_mut().objects[0].instances[0]
            .transform
            .translation
            .y = 7.0;
        let live = wb.scene().clone();

        assert!(wb.undo());
        assert_eq!(*wb.scene(), loaded);
        assert_eq!(wb.history_label(0), Some("loaded"));

        assert!(wb.redo());
        assert_eq!(*wb.scene(), moved);
        assert!(wb.redo(), "redo must reach the pre-undo live state");
        assert_eq!(*wb.scene(), live);
        assert!(!wb.redo());
    }

    #[test]
    fn declined_technology_switch_aborts_the_jump() {
        let host = TestHost::default();
        let mut wb = bench(&host);
        wb.scene_mut().add_object(cube_object(10.0, 1, 0.0));
        wb.take_snapshot("fdm state");

        wb.config_mut().technology = Technology::Sla;
        wb.config_mut().printer_profile = "resin-fast".to_owned();
        wb.scene_mut().objects[0].instances[0]
            .transform
            .translation
            .x = 12.0;
        wb.take_snapshot("sla state");
        let before = wb.scene().clone();

        assert!(!wb.undo(), "declined switch must abort");
        assert_eq!(*wb.scene(), before);
        assert_eq!(wb.config().technology, Technology::Sla);

        host.0.confirm.store(true, Ordering::Relaxed);
        assert!(wb.undo());
        assert_eq!(wb.config().technology, Technology::Fdm);
        assert_eq!(wb.config().printer_profile, "default");

        // The resin profile comes back on redo.
        assert!(wb.redo());
        assert_eq!(wb.config().technology, Technology::Sla);
        assert_eq!(wb.config().printer_profile, "resin-fast");
    }

    #[test]
    fn deferred_error_is_flushed_on_activation_once() {
        let host = TestHost::default();
        let mut wb = bench(&host);
        wb.config_mut().technology = Technology::Sla;
        wb.config_mut().max_print_height = 1.0;
        wb.scene_mut().add_object(cube_object(10.0, 1, 0.0));

        wb.scene_edited();
        assert!(host.0.errors.lock().is_empty());

        host.0.active.store(true, Ordering::Relaxed);
        wb.on_activated();
        assert_eq!(host.0.errors.lock().len(), 1);
        wb.on_activated();
        assert_eq!(host.0.errors.lock().len(), 1, "shown exactly once");
    }

    #[test]
    fn export_fails_fast_on_invalid_state() {
        let host = TestHost::default();
        host.0.active.store(true, Ordering::Relaxed);
        let mut wb = bench(&host);
        wb.scene_mut().add_object(cube_object(10.0, 1, 0.0));
        wb.config_mut().max_print_height = 1.0;
        assert_eq!(wb.start_export(), Err(ExportError::Invalid));

        wb.config_mut().max_print_height = 200.0;
        // Forced export runs even with auto processing off.
        wb.config_mut().background_processing = false;
        assert_eq!(wb.start_export(), Ok(()));
    }

    #[test]
    fn gizmo_session_history_is_isolated() {
        let host = TestHost::default();
        let mut wb = bench(&host);
        wb.scene_mut().add_object(cube_object(10.0, 1, 0.0));
        wb.take_snapshot("main");

        assert!(wb.enter_gizmo_session("drag start"));
        assert!(!wb.enter_gizmo_session("nested"), "one session at a time");
        wb.scene_mut().objects[0].instances[0]
            .transform
            .translation
            .x = 99.0;
        wb.take_snapshot("mid drag");
        assert_eq!(wb.stack_main.snapshots().len(), 1);
        assert_eq!(wb.stack_gizmos.snapshots().len(), 2);

        assert!(wb.undo(), "undo stays inside the session");
        assert_eq!(
            wb.scene().objects[0].instances[0].transform.translation.x,
            0.0
        );

        wb.leave_gizmo_session();
        assert!(wb.stack_gizmos.is_empty());
        wb.take_snapshot("back on main");
        assert_eq!(wb.stack_main.snapshots().len(), 2);
    }

    #[test]
    fn arrange_separates_overlapping_objects() {
        let _ = env_logger::builder().is_test(true).try_init();
        let host = TestHost::default();
        let mut wb = bench(&host);
        wb.scene_mut().add_object(cube_object(30.0, 1, 0.0));
        wb.scene_mut().add_object(cube_object(30.0, 1, 0.0));

        assert!(wb.arrange(ArrangeScope::All));
        assert_eq!(wb.history_label(0), Some("Arrange"));
        assert!(wb.jobs().arrange_slot().join(Duration::from_secs(10)));
        wb.tick(Instant::now());

        let a = wb.scene().objects[0]
            .convex_hull_2d(&wb.scene().objects[0].instances[0].transform)
            .bounding_box();
        let b = wb.scene().objects[1]
            .convex_hull_2d(&wb.scene().objects[1].instances[0].transform)
            .bounding_box();
        assert!(
            !a.inflated(5.99).intersects(&b),
            "{a:?} and {b:?} must keep the object distance"
        );
        assert!(host.0.refreshes.load(Ordering::Relaxed) >= 1);
        assert!(host.0.warnings.lock().is_empty());
    }
}
