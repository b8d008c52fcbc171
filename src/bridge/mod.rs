//! Platform service bridge.
//!
//! Translates the callback-driven model of an OS service manager into the blocking model of
//! [`Lifecycle`]. The translation itself ([`ControlBridge`]) is platform-neutral; the
//! Windows adapter only feeds it control codes and hands it a [`StatusReporter`]. Where no
//! service manager exists, [`run`] degrades to calling `start` on the current thread.
use std::{
    ops::BitOr,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};

use strum_macros::AsRefStr;
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    lifecycle::{Controllable, Lifecycle},
};

#[cfg(windows)]
pub mod windows;

/// Wait hint reported while a stop is pending.
pub const STOP_WAIT_HINT: Duration = Duration::from_millis(5000);

/// User-defined control code that requests a reload (`on_signal`).
pub const RELOAD_CONTROL: u32 = 128;

/// Service state as reported to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ManagerState {
    StartPending,
    Running,
    Paused,
    StopPending,
    Stopped,
}

/// Set of control codes the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptedControls(u8);

impl AcceptedControls {
    pub const NONE: Self = Self(0);
    pub const STOP: Self = Self(1);
    pub const SHUTDOWN: Self = Self(1 << 1);
    pub const PAUSE_CONTINUE: Self = Self(1 << 2);

    /// Controls accepted while the service runs.
    pub const fn running() -> Self {
        Self(Self::STOP.0 | Self::SHUTDOWN.0 | Self::PAUSE_CONTINUE.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for AcceptedControls {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Mirror of the manager's service status structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub state: ManagerState,
    pub controls: AcceptedControls,
    /// Progress counter; every report from the control handler advances it.
    pub checkpoint: u32,
    pub wait_hint: Duration,
    pub exit_code: u32,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            state: ManagerState::StartPending,
            controls: AcceptedControls::NONE,
            checkpoint: 0,
            wait_hint: Duration::ZERO,
            exit_code: 0,
        }
    }
}

/// Manager-to-process instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    Stop,
    Shutdown,
    Pause,
    Continue,
    Interrogate,
    Reload,
    Other(u32),
}

/// Result handed back to the manager's control dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Handled,
    NotImplemented,
}

/// Delivers a status record to the service manager.
pub trait StatusReporter: Send + Sync {
    fn report(&self, status: &StatusRecord) -> Result<(), ServiceError>;
}

/// Drives a [`Controllable`] from service-manager callbacks.
///
/// `serve` is the body of the manager's dispatch thread and blocks for the whole service
/// lifetime. `handle_control` may run concurrently on any thread the manager picks.
pub struct ControlBridge<C: Controllable> {
    name: String,
    controller: Arc<C>,
    status: Mutex<StatusRecord>,
    reporter: OnceLock<Box<dyn StatusReporter>>,
}

impl<C: Controllable> ControlBridge<C> {
    pub fn new(name: impl Into<String>, controller: Arc<C>) -> Self {
        Self {
            name: name.into(),
            controller,
            status: Mutex::new(StatusRecord::default()),
            reporter: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches the status channel obtained from the manager's registration. Returns false
    /// if a reporter was already attached.
    pub fn attach(&self, reporter: Box<dyn StatusReporter>) -> bool {
        self.reporter.set(reporter).is_ok()
    }

    /// Snapshot of the last reported status.
    pub fn status(&self) -> StatusRecord {
        self.status_guard().clone()
    }

    fn status_guard(&self) -> MutexGuard<'_, StatusRecord> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reports while the status lock is held so reports reach the manager in checkpoint
    /// order.
    fn send(&self, status: &StatusRecord) {
        let Some(reporter) = self.reporter.get() else {
            debug!(service = %self.name, state = status.state.as_ref(), "no status handle attached");
            return;
        };

        if let Err(err) = reporter.report(status) {
            warn!(service = %self.name, "status report failed: {err}");
        }
    }

    fn publish(&self, update: impl FnOnce(&mut StatusRecord)) {
        let mut status = self.status_guard();
        update(&mut status);
        self.send(&status);
    }

    /// Dispatch-thread body: report pending, run `init`, report running, block in `start`,
    /// report stopped. A failing `init` skips `start` entirely.
    pub fn serve(&self) -> Result<(), ServiceError> {
        self.publish(|status| {
            *status = StatusRecord::default();
        });

        let outcome = match self.controller.init() {
            Ok(()) => {
                self.publish(|status| {
                    status.state = ManagerState::Running;
                    status.controls = AcceptedControls::running();
                    status.wait_hint = Duration::ZERO;
                });
                info!(service = %self.name, "service reported running");
                self.controller.start()
            }
            Err(err) => {
                warn!(service = %self.name, "initialisation failed: {err}");
                Err(err)
            }
        };

        let exit_code = u32::from(outcome.is_err());
        self.publish(|status| {
            status.state = ManagerState::Stopped;
            status.controls = AcceptedControls::NONE;
            status.wait_hint = Duration::ZERO;
            status.exit_code = exit_code;
        });
        info!(service = %self.name, exit_code, "service reported stopped");

        outcome
    }

    /// Control-handler body. Every invocation advances the checkpoint and re-reports.
    pub fn handle_control(&self, code: ControlCode) -> ControlOutcome {
        debug!(service = %self.name, ?code, "control code received");

        if code == ControlCode::Reload
            && let Err(err) = self.controller.reload()
        {
            warn!(service = %self.name, "reload failed: {err}");
        }

        let mut status = self.status_guard();
        // A late control must not move a stopped service back out of Stopped.
        let stopped = status.state == ManagerState::Stopped;
        // Pause and continue no longer apply once a stop is pending.
        let pausable = !matches!(
            status.state,
            ManagerState::StopPending | ManagerState::Stopped
        );
        let outcome = match code {
            ControlCode::Stop | ControlCode::Shutdown => {
                self.controller.stop();
                if !stopped {
                    status.state = ManagerState::StopPending;
                    status.controls = AcceptedControls::NONE;
                    status.wait_hint = STOP_WAIT_HINT;
                }
                ControlOutcome::Handled
            }
            ControlCode::Pause if pausable => {
                self.controller.pause();
                status.state = ManagerState::Paused;
                ControlOutcome::Handled
            }
            ControlCode::Continue if pausable => {
                self.controller.resume();
                status.state = ManagerState::Running;
                ControlOutcome::Handled
            }
            ControlCode::Pause | ControlCode::Continue => {
                debug!(service = %self.name, ?code, "ignoring pause/continue while stopping");
                ControlOutcome::Handled
            }
            ControlCode::Interrogate | ControlCode::Reload => ControlOutcome::Handled,
            ControlCode::Other(raw) => {
                debug!(service = %self.name, raw, "ignoring unrecognised control code");
                ControlOutcome::NotImplemented
            }
        };

        status.checkpoint = status.checkpoint.saturating_add(1);
        self.send(&status);
        outcome
    }
}

/// Calls `init` and then the blocking `start` on the current thread.
pub fn direct<C: Controllable + ?Sized>(controller: &C) -> Result<(), ServiceError> {
    controller.init()?;
    controller.start()
}

/// Runs the service under the platform's service manager.
#[cfg(windows)]
pub fn run(lifecycle: Arc<Lifecycle>) -> Result<(), ServiceError> {
    windows::run(lifecycle)
}

/// Runs the service on the calling thread; there is no service manager to talk to.
#[cfg(not(windows))]
pub fn run(lifecycle: Arc<Lifecycle>) -> Result<(), ServiceError> {
    direct(lifecycle.as_ref())
}
