//! # Background computation control
//!
//! Decides, after every batch of edits, what has to happen to the compute
//! backend: restart it, refresh the preview, or surface a validation error.
//! One derived [`ComputeGraph`] exists per technology; `update` diffs the
//! live scene and configuration against the active one.
//!
//! Edits are coalesced through a single-shot [`DebounceTimer`] so a burst
//! produces exactly one `update`; a direct `update` supersedes a pending
//! timer. Validation errors raised while the host window is inactive are
//! deferred, never dropped.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bedlam_core::config::{Config, Technology};
use bedlam_core::scene::{Object, Scene};

use crate::Host;

bitflags::bitflags! {
    /// Outcome of one controller update. The UI reads it for button and
    /// status state; [`BackgroundProcess::restart`] consumes it.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct UpdateFlags: u32 {
        /// The backend should be (re)started.
        const RESTART = 1;
        /// Derived preview state changed; the 3D view must reload.
        const REFRESH_SCENE = 1 << 1;
        /// Validation failed; starting the backend is pointless.
        const INVALID = 1 << 2;
        /// Restart even without a pending invalidation.
        const FORCE_RESTART = 1 << 3;
        /// Restart requested by an export, overriding the auto-processing
        /// setting.
        const FORCE_EXPORT = 1 << 4;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApplyStatus {
    Unchanged,
    Invalidated,
}

/// What the backend last saw of the scene and configuration, per
/// technology. Holds fingerprints and validation inputs, never scene
/// ownership.
pub struct ComputeGraph {
    technology: Technology,
    scene_fingerprint: Option<u64>,
    config_fingerprint: Option<u64>,
    object_count: usize,
    max_z: f64,
}
impl ComputeGraph {
    #[must_use]
    pub fn new(technology: Technology) -> Self {
        Self {
            technology,
            scene_fingerprint: None,
            config_fingerprint: None,
            object_count: 0,
            max_z: 0.0,
        }
    }
    /// Nothing to compute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.object_count == 0
    }
    /// Diff the live state in. `Invalidated` means previously computed
    /// results are stale.
    pub fn apply(&mut self, scene: &Scene, config: &Config) -> ApplyStatus {
        self.object_count = scene.objects.len();
        self.max_z = scene.objects.iter().map(Object::max_z).fold(0.0, f64::max);
        let scene_fp = Some(scene.fingerprint());
        let config_fp = Some(config.fingerprint());
        if self.scene_fingerprint == scene_fp && self.config_fingerprint == config_fp {
            return ApplyStatus::Unchanged;
        }
        self.scene_fingerprint = scene_fp;
        self.config_fingerprint = config_fp;
        log::trace!("{} compute graph invalidated", self.technology);
        ApplyStatus::Invalidated
    }
    /// `Err` carries a complete, user-readable message.
    pub fn validate(&self, config: &Config) -> Result<(), String> {
        if config.bed_shape.is_degenerate() {
            return Err("The print bed shape is not usable.".to_owned());
        }
        if self.max_z > config.max_print_height {
            return Err(format!(
                "An object is taller than the maximum print height of {} mm.",
                config.max_print_height
            ));
        }
        Ok(())
    }
}

/// The compute backend proper. The real slicer lives behind this; the
/// editor core only starts and stops it.
pub trait Processor: Send {
    /// Begin (or resume) computing. `false` when nothing could start.
    fn start(&mut self) -> bool;
    /// Stop, blocking until the worker is idle.
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    /// Whether the last run completed without being stopped.
    fn is_finished(&self) -> bool;
}

/// A stand-in backend that burns a fixed number of work units on a worker
/// thread. Used headless and in demos.
pub struct SimulatedProcessor {
    units: u32,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
    running: std::sync::Arc<std::sync::atomic::AtomicBool>,
    finished: std::sync::Arc<std::sync::atomic::AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}
impl SimulatedProcessor {
    #[must_use]
    pub fn new(units: u32) -> Self {
        Self {
            units,
            stop: std::sync::Arc::default(),
            running: std::sync::Arc::default(),
            finished: std::sync::Arc::default(),
            worker: None,
        }
    }
}
impl Processor for SimulatedProcessor {
    fn start(&mut self) -> bool {
        use std::sync::atomic::Ordering;
        if self.is_running() {
            return true;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.stop.store(false, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        let (stop, running, finished, units) = (
            std::sync::Arc::clone(&self.stop),
            std::sync::Arc::clone(&self.running),
            std::sync::Arc::clone(&self.finished),
            self.units,
        );
        let spawned = std::thread::Builder::new()
            .name("compute-backend".to_owned())
            .spawn(move || {
                for _ in 0..units {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                finished.store(!stop.load(Ordering::SeqCst), Ordering::SeqCst);
                running.store(false, Ordering::SeqCst);
            });
        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                true
            }
            Err(e) => {
                log::error!("could not spawn the compute backend: {e}");
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }
    fn stop(&mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
    fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::SeqCst)
    }
    fn is_finished(&self) -> bool {
        self.finished.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Single-shot restartable timer coalescing edit bursts. Re-arming
/// replaces the pending deadline, so a burst fires exactly once.
pub struct DebounceTimer {
    deadline: Option<Instant>,
    delay: Duration,
}
impl DebounceTimer {
    pub const DELAY: Duration = Duration::from_millis(500);

    #[must_use]
    pub fn new() -> Self {
        Self {
            deadline: None,
            delay: Self::DELAY,
        }
    }
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }
    /// True exactly once, when the pending deadline has passed.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
impl Default for DebounceTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Out-of-band notifications for status listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The backend stopped as a side effect of applying edits and no
    /// restart was requested. Listeners resynchronize their idle state.
    CompletedWithCancellation,
}

pub struct BackgroundProcess {
    graphs: [ComputeGraph; 2],
    backend: Box<dyn Processor>,
    timer: DebounceTimer,
    delayed_error: Option<String>,
    events: VecDeque<ProcessEvent>,
}
impl BackgroundProcess {
    #[must_use]
    pub fn new(backend: Box<dyn Processor>) -> Self {
        Self {
            graphs: [
                ComputeGraph::new(Technology::Fdm),
                ComputeGraph::new(Technology::Sla),
            ],
            backend,
            timer: DebounceTimer::new(),
            delayed_error: None,
            events: VecDeque::new(),
        }
    }
    #[must_use]
    pub fn graph(&self, technology: Technology) -> &ComputeGraph {
        &self.graphs[technology.index()]
    }
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.backend.is_running()
    }
    pub fn stop(&mut self) {
        self.backend.stop();
    }

    /// Defer the next `update` to a timer tick, coalescing edit bursts.
    pub fn schedule_update(&mut self, now: Instant) {
        self.timer.schedule(now);
    }
    /// `true` when a scheduled update has come due; the caller follows up
    /// with [`Self::update`].
    pub fn poll_timer(&mut self, now: Instant) -> bool {
        self.timer.due(now)
    }

    /// Apply the live scene and configuration to the active graph and
    /// decide what follows. With `postpone_error_messages` (or an inactive
    /// host) a validation error is queued instead of shown.
    pub fn update(
        &mut self,
        scene: &Scene,
        config: &Config,
        host: &dyn Host,
        force_validation: bool,
        postpone_error_messages: bool,
    ) -> UpdateFlags {
        self.timer.cancel();
        let was_running = self.backend.is_running();
        let mut flags = UpdateFlags::empty();

        let invalidated =
            self.graphs[config.technology.index()].apply(scene, config) == ApplyStatus::Invalidated;
        if invalidated {
            // Whatever the backend produced so far is stale.
            self.backend.stop();
            if config.technology == Technology::Sla || config.aux_tower_enabled {
                // Supports (or the aux tower preview) live in the scene.
                flags |= UpdateFlags::REFRESH_SCENE;
            }
        }

        let graph = &self.graphs[config.technology.index()];
        if (invalidated || force_validation) && !graph.is_empty() {
            match graph.validate(config) {
                Ok(()) => {
                    self.delayed_error = None;
                    if invalidated && config.background_processing {
                        flags |= UpdateFlags::RESTART;
                    }
                }
                Err(message) => {
                    flags |= UpdateFlags::INVALID;
                    if !postpone_error_messages && host.is_active() {
                        host.show_error(&message);
                    } else {
                        // Deferred, never dropped; a newer message
                        // supersedes an unseen older one.
                        self.delayed_error = Some(message);
                    }
                }
            }
        }
        if self.delayed_error.is_some() {
            flags |= UpdateFlags::INVALID;
        }
        // Only a stop this update caused counts as a cancellation; a
        // backend finishing on its own is not one.
        if invalidated
            && was_running
            && !self.backend.is_running()
            && !flags.contains(UpdateFlags::RESTART)
        {
            self.events.push_back(ProcessEvent::CompletedWithCancellation);
        }
        flags
    }

    /// Start the backend if `flags` ask for it. Refused while a job runs:
    /// jobs and the backend never touch the scene concurrently.
    pub fn restart(&mut self, flags: UpdateFlags, any_job_running: bool) -> bool {
        if any_job_running {
            log::debug!("backend restart refused, a job is running");
            return false;
        }
        if flags.contains(UpdateFlags::INVALID) {
            return false;
        }
        if flags.intersects(
            UpdateFlags::RESTART | UpdateFlags::FORCE_RESTART | UpdateFlags::FORCE_EXPORT,
        ) {
            return self.backend.start();
        }
        false
    }

    /// The error deferred while the host was inactive, if any. Taking it
    /// clears it: it is shown exactly once.
    pub fn take_delayed_error(&mut self) -> Option<String> {
        self.delayed_error.take()
    }
    pub fn pop_event(&mut self) -> Option<ProcessEvent> {
        self.events.pop_front()
    }
}
