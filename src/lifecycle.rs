//! Lifecycle controller: the single owner of run/stop state.
//!
//! `start` runs `on_start`, parks the calling thread until `stop` is requested, then runs
//! `on_stop` on that same thread. `stop` only flips a flag under the mutex and notifies the
//! condition variable, so it can be called from any thread any number of times.
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use strum_macros::AsRefStr;
use tracing::{debug, error, info};

use crate::{
    config::{Callback, ServiceConfig},
    error::{CallbackStage, ServiceError},
};

/// Observable state of a [`Lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
}

/// Capability set the platform bridge drives.
///
/// `init`, `pause` and `resume` default to trivial success so a concrete service only has
/// to provide `start` and `stop`.
pub trait Controllable: Send + Sync {
    /// Runs before the service reports itself as running.
    fn init(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Blocks for the whole active lifetime of the service.
    fn start(&self) -> Result<(), ServiceError>;

    /// Requests termination. Must not block.
    fn stop(&self);

    fn pause(&self) {}

    fn resume(&self) {}

    /// Forwards a reload request delivered through the service manager.
    fn reload(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Flags {
    started: bool,
    start_completed: bool,
    stop_requested: bool,
    stopped: bool,
}

/// The service lifecycle controller.
///
/// One instance exists per process. It is created by the entry point and shared as
/// `Arc<Lifecycle>` with the signal relay and the platform bridge.
pub struct Lifecycle {
    config: ServiceConfig,
    flags: Mutex<Flags>,
    wake: Condvar,
}

/// Marks the controller stopped when `start` returns, unwinds, or bails out early.
struct StoppedOnExit<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for StoppedOnExit<'_> {
    fn drop(&mut self) {
        let mut flags = self.lifecycle.flags();
        flags.stopped = true;
        drop(flags);
        self.lifecycle.wake.notify_all();
        info!(service = %self.lifecycle.name(), "service stopped");
    }
}

impl Lifecycle {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            flags: Mutex::new(Flags::default()),
            wake: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // The guarded data is a set of monotonic booleans; a panicking holder cannot leave it
    // half-updated, so a poisoned lock is still usable.
    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `on_start`, blocks until [`Lifecycle::stop`] is requested, then runs `on_stop`.
    ///
    /// Call from exactly one thread; a second call returns
    /// [`ServiceError::AlreadyStarted`]. A stop requested before this call is honoured: the
    /// wait predicate is checked before parking, so `start` returns right after `on_start`.
    /// If `on_start` fails, the error is returned without waiting and `on_stop` is skipped.
    pub fn start(&self) -> Result<(), ServiceError> {
        {
            let mut flags = self.flags();
            if flags.started {
                return Err(ServiceError::AlreadyStarted {
                    service: self.name().to_string(),
                });
            }
            flags.started = true;
        }

        let _finish = StoppedOnExit { lifecycle: self };
        info!(service = %self.name(), "starting service");
        self.invoke(CallbackStage::Start, self.config.on_start())?;

        let mut flags = self.flags();
        flags.start_completed = true;
        self.wake.notify_all();
        let flags = self
            .wake
            .wait_while(flags, |flags| !flags.stop_requested)
            .unwrap_or_else(PoisonError::into_inner);
        drop(flags);

        info!(service = %self.name(), "stop requested, shutting down");
        self.invoke(CallbackStage::Stop, self.config.on_stop())
    }

    /// Requests termination and wakes the thread blocked in [`Lifecycle::start`].
    ///
    /// Idempotent and non-blocking beyond the short critical section; never runs `on_stop`
    /// itself.
    pub fn stop(&self) {
        let mut flags = self.flags();
        if flags.stop_requested {
            debug!(service = %self.name(), "stop already requested");
            return;
        }
        flags.stop_requested = true;
        drop(flags);

        self.wake.notify_all();
        info!(service = %self.name(), "stop requested");
    }

    pub fn pause(&self) {
        info!(service = %self.name(), "pause requested");
    }

    pub fn resume(&self) {
        info!(service = %self.name(), "continue requested");
    }

    /// Runs the `on_init` hook.
    pub fn init(&self) -> Result<(), ServiceError> {
        self.invoke(CallbackStage::Init, self.config.on_init())
    }

    /// Runs the `on_signal` callback. Does not touch run/stop state.
    pub fn signal(&self) -> Result<(), ServiceError> {
        info!(service = %self.name(), "reload signal received");
        self.invoke(CallbackStage::Signal, self.config.on_signal())
    }

    /// True once `start` has returned.
    pub fn is_stopped(&self) -> bool {
        self.flags().stopped
    }

    pub fn stop_requested(&self) -> bool {
        self.flags().stop_requested
    }

    pub fn state(&self) -> LifecycleState {
        let flags = self.flags();
        if flags.stopped {
            LifecycleState::Stopped
        } else if flags.stop_requested {
            LifecycleState::StopRequested
        } else if flags.started {
            LifecycleState::Running
        } else {
            LifecycleState::NotStarted
        }
    }

    /// Blocks until `on_start` has returned or the controller has stopped, whichever
    /// comes first, and reports the state observed at that point.
    pub fn wait_until_running(&self) -> LifecycleState {
        let flags = self.flags();
        let flags = self
            .wake
            .wait_while(flags, |flags| !flags.start_completed && !flags.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        drop(flags);
        self.state()
    }

    fn invoke(
        &self,
        stage: CallbackStage,
        callback: Option<&Callback>,
    ) -> Result<(), ServiceError> {
        let Some(callback) = callback else {
            return Ok(());
        };

        debug!(service = %self.name(), stage = %stage, "invoking callback");
        callback().map_err(|source| {
            error!(service = %self.name(), stage = %stage, "callback failed: {source}");
            ServiceError::Callback {
                service: self.name().to_string(),
                stage,
                source,
            }
        })
    }
}

impl Controllable for Lifecycle {
    fn init(&self) -> Result<(), ServiceError> {
        Lifecycle::init(self)
    }

    fn start(&self) -> Result<(), ServiceError> {
        Lifecycle::start(self)
    }

    fn stop(&self) {
        Lifecycle::stop(self)
    }

    fn pause(&self) {
        Lifecycle::pause(self)
    }

    fn resume(&self) {
        Lifecycle::resume(self)
    }

    fn reload(&self) -> Result<(), ServiceError> {
        Lifecycle::signal(self)
    }
}
