//! # Background jobs
//!
//! Long computations run on worker threads through a fixed set of
//! [`JobSlot`]s, created once at startup and restarted any number of times.
//! Cancellation is always cooperative: [`Ctl::was_canceled`] is polled at
//! safe points inside `process`, never preempted. A worker that ignores the
//! flag past the join deadline is abandoned; its `finalize` still sees the
//! flag and discards the stale result.
//!
//! Results only ever reach the scene through `finalize`, which
//! [`group::JobGroup`] pumps from the interactive thread.

pub mod arrange;
pub mod group;
pub mod orient;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bedlam_core::config::Config;
use bedlam_core::scene::{Scene, Selection};

/// Everything `prepare` may read. Jobs copy out what they need and hold no
/// references past `prepare`.
#[derive(Copy, Clone)]
pub struct JobContext<'a> {
    pub scene: &'a Scene,
    pub selection: &'a Selection,
    pub config: &'a Config,
}

/// One progress report from a worker.
#[derive(Clone, Debug)]
pub struct Progress {
    pub percent: i32,
    pub status: String,
}

/// Worker-side handle: the cancellation flag plus the progress channel.
pub struct Ctl {
    shared: Arc<Shared>,
    progress: crossbeam::channel::Sender<Progress>,
}
impl Ctl {
    #[must_use]
    pub fn was_canceled(&self) -> bool {
        self.shared.canceled.load(Ordering::Relaxed)
    }
    pub fn update_status(&self, percent: i32, status: impl Into<String>) {
        // The receiver only goes away when the slot does; a lost report
        // then is fine.
        let _ = self.progress.send(Progress {
            percent,
            status: status.into(),
        });
    }
}

pub trait Job: Send {
    fn name(&self) -> &'static str;
    /// Runs on the interactive thread, before the worker spawns.
    fn prepare(&mut self, ctx: &JobContext<'_>);
    /// Runs on a worker thread. Must poll [`Ctl::was_canceled`] between
    /// units of work and bail out early.
    fn process(&mut self, ctl: &Ctl);
    /// Runs on the interactive thread once the worker is done. A canceled
    /// run commits nothing. Returns whether the scene should be refreshed.
    fn finalize(&mut self, canceled: bool, _scene: &mut Scene, _config: &Config) -> bool {
        !canceled
    }
}

struct Shared {
    running: parking_lot::Mutex<bool>,
    idle: parking_lot::Condvar,
    canceled: AtomicBool,
    finalize_pending: AtomicBool,
}
impl Shared {
    fn idle() -> Self {
        Self {
            running: parking_lot::Mutex::new(false),
            idle: parking_lot::Condvar::new(),
            canceled: AtomicBool::new(false),
            finalize_pending: AtomicBool::new(false),
        }
    }
}

/// Worker-thread lifecycle around one reusable [`Job`].
pub struct JobSlot<J> {
    job: Arc<parking_lot::Mutex<J>>,
    shared: Arc<Shared>,
    send: crossbeam::channel::Sender<Progress>,
    recv: crossbeam::channel::Receiver<Progress>,
}
impl<J: Job + 'static> JobSlot<J> {
    pub fn new(job: J) -> Self {
        let (send, recv) = crossbeam::channel::unbounded();
        Self {
            job: Arc::new(parking_lot::Mutex::new(job)),
            shared: Arc::new(Shared::idle()),
            send,
            recv,
        }
    }
    /// Prepare on the calling thread, then hand `process` to a worker.
    /// A slot that is already running refuses the start.
    pub fn start(&self, ctx: &JobContext<'_>) -> bool {
        let mut running = self.shared.running.lock();
        if *running {
            return false;
        }
        self.shared.canceled.store(false, Ordering::SeqCst);
        self.shared.finalize_pending.store(false, Ordering::SeqCst);
        let name = {
            let mut job = self.job.lock();
            job.prepare(ctx);
            job.name()
        };
        *running = true;
        drop(running);

        let job = Arc::clone(&self.job);
        let shared = Arc::clone(&self.shared);
        let ctl = Ctl {
            shared: Arc::clone(&self.shared),
            progress: self.send.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("job-{name}"))
            .spawn(move || {
                job.lock().process(&ctl);
                shared.finalize_pending.store(true, Ordering::SeqCst);
                let mut running = shared.running.lock();
                *running = false;
                shared.idle.notify_all();
            });
        if let Err(e) = spawned {
            log::error!("could not spawn a worker for {name}: {e}");
            *self.shared.running.lock() = false;
            return false;
        }
        true
    }
    /// Raise the cooperative flag. The worker winds down at its next poll.
    pub fn cancel(&self) {
        self.shared.canceled.store(true, Ordering::SeqCst);
    }
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.shared.running.lock()
    }
    /// Block until the worker is idle, up to `timeout`. `true` when idle.
    pub fn join(&self, timeout: Duration) -> bool {
        let mut running = self.shared.running.lock();
        if !*running {
            return true;
        }
        !self
            .shared
            .idle
            .wait_while_for(&mut running, |running| *running, timeout)
            .timed_out()
    }
    /// Run `finalize` if the worker has delivered since the last pump.
    /// Must be called from the interactive thread.
    pub fn finalize(&self, scene: &mut Scene, config: &Config) -> Option<bool> {
        if !self.shared.finalize_pending.swap(false, Ordering::SeqCst) {
            return None;
        }
        let canceled = self.shared.canceled.load(Ordering::SeqCst);
        Some(self.job.lock().finalize(canceled, scene, config))
    }
    pub fn drain_progress(&self) -> Vec<Progress> {
        self.recv.try_iter().collect()
    }
    /// Access the job itself, for configuration between runs. Blocks while
    /// the worker holds it, so only call on an idle slot.
    pub fn with_job<R>(&self, f: impl FnOnce(&mut J) -> R) -> R {
        f(&mut self.job.lock())
    }
}

#[cfg(test)]
pub(crate) fn test_ctl() -> (Ctl, crossbeam::channel::Receiver<Progress>) {
    let (send, recv) = crossbeam::channel::unbounded();
    (
        Ctl {
            shared: Arc::new(Shared::idle()),
            progress: send,
        },
        recv,
    )
}
