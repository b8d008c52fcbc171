//! Error handling for sysvc.
use std::{error::Error as StdError, fmt, io, path::PathBuf};

use thiserror::Error;

/// Boxed error returned by user-supplied lifecycle callbacks.
pub type CallbackError = Box<dyn StdError + Send + Sync + 'static>;

/// Lifecycle stage in which a user callback ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStage {
    /// The `on_init` hook, run before the service reports itself running.
    Init,
    /// The `on_start` callback.
    Start,
    /// The `on_stop` callback.
    Stop,
    /// The `on_signal` callback.
    Signal,
}

impl CallbackStage {
    /// String representation used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackStage::Init => "on_init",
            CallbackStage::Start => "on_start",
            CallbackStage::Stop => "on_stop",
            CallbackStage::Signal => "on_signal",
        }
    }
}

impl fmt::Display for CallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defines all errors surfaced by the service runtime.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service manager refused the dispatcher or control-handler registration.
    #[error("Failed to register service '{service}' with the service manager: {reason}")]
    Registration {
        /// The service name used for registration.
        service: String,
        /// Reason reported by the platform.
        reason: String,
    },

    /// `start` was called more than once on the same controller.
    #[error("Service '{service}' has already been started")]
    AlreadyStarted {
        /// The service name.
        service: String,
    },

    /// A user callback returned an error.
    #[error("Callback {stage} of service '{service}' failed: {source}")]
    Callback {
        /// The service name.
        service: String,
        /// Which callback failed.
        stage: CallbackStage,
        /// The error returned by the callback.
        #[source]
        source: CallbackError,
    },

    /// The service manager rejected a status report.
    #[error("Failed to report status of service '{service}': {reason}")]
    StatusReport {
        /// The service name.
        service: String,
        /// Reason reported by the platform.
        reason: String,
    },

    /// Installing the process signal handlers failed.
    #[error("Failed to install signal handlers: {source}")]
    SignalInstall {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Installing the console interrupt handler failed.
    #[error("Failed to install console handler: {0}")]
    ConsoleHandler(#[from] ctrlc::Error),

    /// Generic I/O failure (thread spawn, terminal, PID file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A system call failed.
    #[cfg(unix)]
    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    /// Loading the service manifest failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Error type for manifest loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the manifest file.
    #[error("Failed to read manifest {path}: {source}")]
    Read {
        /// Path of the manifest.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Error parsing the YAML document.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The manifest references an environment variable that is not set.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    /// The variable-expansion pattern failed to compile.
    #[error("Invalid expansion pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The service name is empty.
    #[error("Service name must not be empty")]
    EmptyName,
}

/// Error type for the filesystem watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Creating the notification descriptor failed.
    #[error("Failed to initialise the change notifier: {0}")]
    Init(#[source] io::Error),

    /// Adding a watch for a path failed.
    #[error("Failed to watch {path}: {source}")]
    Add {
        /// The path that could not be watched.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Removing one or more watches failed.
    #[error("Failed to remove {failed} watch(es)")]
    Remove {
        /// Number of watches whose removal failed.
        failed: usize,
    },

    /// The platform has no change-notification backend.
    #[error("Filesystem watching is not supported on this platform")]
    Unsupported,
}
