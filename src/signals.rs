//! Signal relay: forwards termination and reload signals to the lifecycle controller.
//!
//! The OS-level handler installed by `signal-hook` only writes to a self-pipe. A dedicated
//! relay thread drains it and calls into [`Lifecycle`], so `on_signal` and logging never run
//! in signal context. The handler stays registered until [`SignalRelay::close`], so repeated
//! deliveries keep being relayed.
use std::sync::Arc;

use crate::{error::ServiceError, lifecycle::Lifecycle};

#[cfg(unix)]
use signal_hook::{
    consts::signal::{SIGHUP, SIGTERM},
    iterator::{Handle, Signals},
};
#[cfg(unix)]
use std::thread::{self, JoinHandle};
#[cfg(unix)]
use tracing::{debug, info, warn};

/// Signal that requests termination.
#[cfg(unix)]
pub const TERMINATE_SIGNAL: i32 = SIGTERM;

/// Signal that requests a reload (`on_signal`).
#[cfg(unix)]
pub const RELOAD_SIGNAL: i32 = SIGHUP;

/// Dispatches one received signal to the controller.
#[cfg(unix)]
pub fn relay(lifecycle: &Lifecycle, signal: i32) {
    match signal {
        TERMINATE_SIGNAL => {
            info!(service = %lifecycle.name(), "termination signal received");
            lifecycle.stop();
        }
        RELOAD_SIGNAL => {
            if let Err(err) = lifecycle.signal() {
                warn!(service = %lifecycle.name(), "reload callback failed: {err}");
            }
        }
        other => debug!(service = %lifecycle.name(), signal = other, "ignoring signal"),
    }
}

/// Owns the relay thread. Must be installed after the controller exists.
#[cfg(unix)]
pub struct SignalRelay {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

#[cfg(unix)]
impl SignalRelay {
    pub fn install(lifecycle: Arc<Lifecycle>) -> Result<Self, ServiceError> {
        let mut signals = Signals::new([TERMINATE_SIGNAL, RELOAD_SIGNAL])
            .map_err(|source| ServiceError::SignalInstall { source })?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("sysvc-signals".into())
            .spawn(move || {
                for signal in signals.forever() {
                    relay(&lifecycle, signal);
                }
                debug!(service = %lifecycle.name(), "signal relay closed");
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Stops relaying and joins the relay thread.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("signal relay thread panicked");
        }
    }
}

#[cfg(unix)]
impl Drop for SignalRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Termination and reload arrive as service control codes on Windows, so there is nothing
/// to relay.
#[cfg(not(unix))]
pub struct SignalRelay;

#[cfg(not(unix))]
impl SignalRelay {
    pub fn install(_lifecycle: Arc<Lifecycle>) -> Result<Self, ServiceError> {
        Ok(Self)
    }

    pub fn close(self) {}
}
