//! sysvc runs an application as a Windows service or a POSIX daemon behind one lifecycle
//! API. A single [`lifecycle::Lifecycle`] owns run/stop state; the platform bridge, the
//! signal relay and the foreground console all drive it, and the run-mode selector picks
//! which of them hosts the process.

/// Service administration boundary.
pub mod admin;

/// Platform service bridge.
pub mod bridge;

/// CLI interface of the demo binary.
pub mod cli;

/// Configuration management.
pub mod config;

/// Foreground console support.
pub mod console;

/// Daemonization and PID files.
pub mod daemon;

/// Error handling.
pub mod error;

/// Lifecycle controller.
pub mod lifecycle;

/// Reload relay for running instances.
pub mod reload;

/// Run-mode selection.
pub mod selector;

/// Signal relay.
pub mod signals;

/// Filesystem change notification.
pub mod watch;

/// Stop watchdog.
pub mod watchdog;

pub use config::ServiceConfig;
pub use error::ServiceError;
pub use lifecycle::Lifecycle;
pub use selector::run_service;
