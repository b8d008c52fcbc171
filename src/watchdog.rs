//! Detached poller that notices when the controller has stopped.
use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::debug;

use crate::lifecycle::Lifecycle;

/// Default polling interval.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(250);

/// Polls [`Lifecycle::is_stopped`] every `interval` and runs `on_stopped` once it turns
/// true. The handle may be dropped; the thread then finishes on its own.
pub fn spawn_watchdog<F>(
    lifecycle: Arc<Lifecycle>,
    interval: Duration,
    on_stopped: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name("sysvc-watchdog".into())
        .spawn(move || {
            while !lifecycle.is_stopped() {
                thread::sleep(interval);
            }
            debug!(service = %lifecycle.name(), "watchdog observed stop");
            on_stopped();
        })
}
