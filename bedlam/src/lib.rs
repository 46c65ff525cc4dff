//! # bedlam
//!
//! Core of an interactive print-preparation editor. The hosting UI owns the
//! widgets and the 3D view; this crate owns everything that has to stay
//! consistent underneath them: the scene and its undo history, the
//! background compute process and its invalidation protocol, and the
//! long-running jobs (arrangement, orientation search) with their
//! cancellation and mutual-exclusion rules.
//!
//! Everything converges in [`workbench::Workbench`], the facade the UI
//! drives from its interactive thread.

pub mod jobs;
pub mod process;
pub mod settings;
pub mod workbench;

use bedlam_core::config::Technology;

/// Callbacks into the hosting UI. Whatever the core needs from the shell it
/// asks for through this, never through a global.
pub trait Host {
    /// Whether the host window is foreground-active. Errors raised while it
    /// is not are deferred instead of shown.
    fn is_active(&self) -> bool;
    fn show_error(&self, message: &str);
    fn show_warning(&self, message: &str);
    /// Status line and progress updates, `0..=100`.
    fn report_status(&self, percent: i32, message: &str);
    /// Ask consent to switch the active technology (and to `profile`, its
    /// last active printer profile). `false` aborts the operation that
    /// needed the switch.
    fn confirm_technology_switch(&self, technology: Technology, profile: &str) -> bool;
    /// The 3D view must re-upload the scene.
    fn refresh_scene(&self);
}
