//! Mutual exclusion across the background jobs and the compute backend.
//!
//! At most one job runs at a time, and never concurrently with the
//! backend: `start` stops the backend, then cancels and joins every job,
//! before launching the named one. A job that outlives the join deadline
//! is abandoned; the cancel flag makes its eventual `finalize` a no-op.

use std::time::Duration;

use bedlam_core::config::Config;
use bedlam_core::scene::Scene;

use super::arrange::{ArrangeJob, ArrangeScope};
use super::orient::OrientJob;
use super::{JobContext, JobSlot, Progress};

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum JobId {
    Arrange,
    Orient,
}

/// A job launch, with its parameters. Parameters travel through
/// [`JobGroup::start`] so they are applied on an idle slot, never by
/// contending with a running worker for the job itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobRequest {
    Arrange(ArrangeScope),
    Orient,
}

/// The fixed registry of background jobs, created once at startup.
pub struct JobGroup {
    arrange: JobSlot<ArrangeJob>,
    orient: JobSlot<OrientJob>,
}
impl Default for JobGroup {
    fn default() -> Self {
        Self::new()
    }
}
impl JobGroup {
    /// How long a canceled job gets to wind down before being abandoned.
    pub const ABORT_WAIT_MAX: Duration = Duration::from_millis(10_000);

    #[must_use]
    pub fn new() -> Self {
        Self {
            arrange: JobSlot::new(ArrangeJob::default()),
            orient: JobSlot::new(OrientJob::default()),
        }
    }
    #[must_use]
    pub fn arrange_slot(&self) -> &JobSlot<ArrangeJob> {
        &self.arrange
    }
    #[must_use]
    pub fn orient_slot(&self) -> &JobSlot<OrientJob> {
        &self.orient
    }
    #[must_use]
    pub fn is_any_running(&self) -> bool {
        self.arrange.is_running() || self.orient.is_running()
    }
    pub fn cancel_all(&self) {
        self.arrange.cancel();
        self.orient.cancel();
    }
    /// Cancel every job and wait for each, up to [`Self::ABORT_WAIT_MAX`].
    /// A missed deadline is an error, not a failure: the job keeps running
    /// detached and its result is discarded.
    pub fn stop_all(&self) {
        self.cancel_all();
        for (id, joined) in [
            (JobId::Arrange, self.arrange.join(Self::ABORT_WAIT_MAX)),
            (JobId::Orient, self.orient.join(Self::ABORT_WAIT_MAX)),
        ] {
            if !joined {
                log::error!(
                    "{id} job ignored cancellation for {:?}, abandoning it",
                    Self::ABORT_WAIT_MAX
                );
            }
        }
    }
    /// Stop the backend, stop every job, then start the requested one.
    pub fn start(
        &self,
        request: JobRequest,
        ctx: &JobContext<'_>,
        stop_backend: impl FnOnce(),
    ) -> bool {
        stop_backend();
        self.stop_all();
        match request {
            JobRequest::Arrange(scope) => {
                // A worker abandoned past the join deadline may still hold
                // the job; refuse rather than block on it.
                if self.arrange.is_running() {
                    return false;
                }
                self.arrange.with_job(|job| job.set_scope(scope));
                self.arrange.start(ctx)
            }
            JobRequest::Orient => self.orient.start(ctx),
        }
    }
    /// Pump finished jobs on the interactive thread. `true` when any
    /// finalize asked for a scene refresh.
    pub fn finalize_pending(&self, scene: &mut Scene, config: &Config) -> bool {
        let mut refresh = false;
        if let Some(wants) = self.arrange.finalize(scene, config) {
            refresh |= wants;
        }
        if let Some(wants) = self.orient.finalize(scene, config) {
            refresh |= wants;
        }
        refresh
    }
    pub fn drain_progress(&self) -> Vec<Progress> {
        let mut reports = self.arrange.drain_progress();
        reports.extend(self.orient.drain_progress());
        reports
    }
}
