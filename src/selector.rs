//! Run-mode selection: turns the process arguments into one of the ways this process can
//! host the service, and drives that mode to completion.
use std::{
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use strum::IntoEnumIterator;
use tracing::{error, info, warn};

use crate::{
    admin::{self, AdminCommand, ServiceAdmin},
    bridge,
    config::ServiceConfig,
    console::{self, ConsoleExit, ExitSignal},
    daemon::PidFile,
    error::ServiceError,
    lifecycle::{Lifecycle, LifecycleState},
    reload,
    signals::SignalRelay,
    watchdog::{WATCHDOG_INTERVAL, spawn_watchdog},
};

/// How this invocation hosts the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run under the service manager, or detached as a daemon.
    Service,
    /// Run attached to the console with a spinner.
    Foreground,
    /// Ask the running instance to reload.
    Reload,
    /// Forward to the administration backend.
    Admin(AdminCommand),
    /// Print usage.
    Help,
}

/// Chooses the run mode from the arguments following the program name.
///
/// Flags are a dash plus one case-insensitive letter. The first recognised flag wins;
/// unknown flags are skipped. Arguments that name nothing recognisable select [`RunMode::Help`].
/// Administrative letters are only recognised when `admin_available`.
pub fn parse_run_mode<S: AsRef<str>>(args: &[S], admin_available: bool) -> RunMode {
    if args.is_empty() {
        return RunMode::Service;
    }

    for arg in args {
        let mut chars = arg.as_ref().chars();
        if chars.next() != Some('-') {
            continue;
        }
        let Some(letter) = chars.next().map(|c| c.to_ascii_uppercase()) else {
            continue;
        };

        match letter {
            'F' => return RunMode::Foreground,
            'K' => return RunMode::Reload,
            'H' | '?' => return RunMode::Help,
            other if admin_available => {
                if let Some(command) = AdminCommand::from_letter(other) {
                    return RunMode::Admin(command);
                }
            }
            _ => {}
        }
    }

    RunMode::Help
}

/// Usage text; admin flags are listed only when a backend exists.
pub fn usage(admin_available: bool) -> String {
    let mut text = String::from("\n");
    if admin_available {
        for command in AdminCommand::iter() {
            text.push_str(&format!("-{}   {}\n", command.letter(), command.help()));
        }
    }
    text.push_str("-f   Start the application as a console application\n");
    text.push_str("-k   Reload configuration\n");
    text.push_str("-h   Show this help\n");
    text
}

/// Drives one invocation end to end.
pub struct ServiceHost {
    config: ServiceConfig,
    admin: Option<Box<dyn ServiceAdmin>>,
    exit_signal: Option<Box<dyn ExitSignal>>,
    daemonize: bool,
}

impl ServiceHost {
    /// Host with the platform defaults: the platform admin backend, the console exit
    /// condition, and daemonization on unix.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            admin: admin::platform_admin(),
            exit_signal: None,
            daemonize: cfg!(unix),
        }
    }

    pub fn with_admin(mut self, admin: Box<dyn ServiceAdmin>) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Replaces the console condition that ends foreground mode.
    pub fn with_exit_signal(mut self, exit_signal: Box<dyn ExitSignal>) -> Self {
        self.exit_signal = Some(exit_signal);
        self
    }

    pub fn with_daemonize(mut self, daemonize: bool) -> Self {
        self.daemonize = daemonize;
        self
    }

    /// Runs the mode selected by `args` and returns the process exit status.
    pub fn run<S: AsRef<str>>(self, args: &[S]) -> i32 {
        let mode = parse_run_mode(args, self.admin.is_some());
        info!(service = %self.config.name(), ?mode, "run mode selected");

        match mode {
            RunMode::Help => {
                print!("{}", usage(self.admin.is_some()));
                let _ = io::stdout().flush();
                0
            }
            RunMode::Admin(command) => match self.admin.as_deref() {
                Some(admin) => command.dispatch(admin, &self.config),
                None => 0,
            },
            RunMode::Reload => {
                match self.admin.as_deref() {
                    Some(admin) => {
                        let code = admin.reload(self.config.name());
                        if code != 0 {
                            warn!(service = %self.config.name(), code, "reload control failed");
                        }
                    }
                    None => {
                        reload::reload_running_instance(&self.config);
                    }
                }
                0
            }
            RunMode::Foreground => {
                let name = self.config.name().to_string();
                exit_status(&name, self.run_foreground())
            }
            RunMode::Service => {
                let name = self.config.name().to_string();
                exit_status(&name, self.run_service())
            }
        }
    }

    fn run_foreground(self) -> Result<(), ServiceError> {
        let name = self.config.name().to_string();
        let mut exit_signal: Box<dyn ExitSignal> = match self.exit_signal {
            Some(exit_signal) => exit_signal,
            None => Box::new(ConsoleExit::new()?),
        };

        println!("{name} started");
        let lifecycle = Arc::new(Lifecycle::new(self.config));
        let relay = SignalRelay::install(Arc::clone(&lifecycle))?;

        let worker = {
            let lifecycle = Arc::clone(&lifecycle);
            thread::Builder::new()
                .name("sysvc-service".into())
                .spawn(move || lifecycle.start())?
        };

        let spun = if lifecycle.wait_until_running() == LifecycleState::Stopped {
            Ok(())
        } else {
            let mut stdout = io::stdout();
            console::spin_until_exit(exit_signal.as_mut(), &lifecycle, &mut stdout)
        };
        drop(exit_signal);

        println!("{name} stopped");
        lifecycle.stop();
        let outcome = match worker.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(ServiceError::Io(io::Error::other("service thread panicked"))),
        };
        relay.close();

        spun.and(outcome)
    }

    fn run_service(self) -> Result<(), ServiceError> {
        // Resolved before daemonizing moves the working directory to "/".
        let pid_path = self.config.pid_file().map(std::path::absolute).transpose()?;

        #[cfg(unix)]
        if self.daemonize {
            crate::daemon::daemonize(self.config.log_file())?;
        }

        let pid_file = match pid_path {
            Some(path) => match PidFile::create(&path) {
                Ok(pid_file) => Some(pid_file),
                Err(err) => {
                    warn!(service = %self.config.name(), "failed to write pid file: {err}");
                    None
                }
            },
            None => None,
        };
        let pid_file = Arc::new(Mutex::new(pid_file));

        let lifecycle = Arc::new(Lifecycle::new(self.config));
        let relay = SignalRelay::install(Arc::clone(&lifecycle))?;

        let released = Arc::clone(&pid_file);
        if let Err(err) = spawn_watchdog(Arc::clone(&lifecycle), WATCHDOG_INTERVAL, move || {
            *released.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }) {
            warn!(service = %lifecycle.name(), "failed to start watchdog: {err}");
        }

        let outcome = bridge::run(Arc::clone(&lifecycle));
        relay.close();
        *pid_file.lock().unwrap_or_else(PoisonError::into_inner) = None;
        outcome
    }
}

fn exit_status(name: &str, outcome: Result<(), ServiceError>) -> i32 {
    match outcome {
        Ok(()) => 0,
        Err(err) => {
            error!(service = %name, "{err}");
            1
        }
    }
}

/// Single entry point: selects the run mode from `args` (without the program name) and
/// runs it with the platform defaults.
pub fn run_service<S: AsRef<str>>(config: ServiceConfig, args: &[S]) -> i32 {
    ServiceHost::new(config).run(args)
}
