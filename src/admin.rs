//! Service administration boundary.
//!
//! Each operation acquires and releases its own manager handles and reports an integer
//! status instead of an error, because the status is handed back verbatim as the process
//! exit code.
use strum_macros::{AsRefStr, EnumIter};

use crate::config::ServiceConfig;

/// Administrative operation selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum AdminCommand {
    Install,
    Remove,
    Start,
    Stop,
    Pause,
    Continue,
}

impl AdminCommand {
    /// Maps a mode letter (already upper-cased) to its command.
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'I' => Some(Self::Install),
            'R' => Some(Self::Remove),
            'S' => Some(Self::Start),
            'E' => Some(Self::Stop),
            'P' => Some(Self::Pause),
            'C' => Some(Self::Continue),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::Install => 'i',
            Self::Remove => 'r',
            Self::Start => 's',
            Self::Stop => 'e',
            Self::Pause => 'p',
            Self::Continue => 'c',
        }
    }

    /// One-line usage description.
    pub fn help(self) -> &'static str {
        match self {
            Self::Install => "Install the system service",
            Self::Remove => "Remove the system service",
            Self::Start => "Start the system service",
            Self::Stop => "Stop the system service",
            Self::Pause => "Pause the system service",
            Self::Continue => "Continue the paused system service",
        }
    }

    /// Runs this command against `admin` for the configured service.
    pub fn dispatch(self, admin: &dyn ServiceAdmin, config: &ServiceConfig) -> i32 {
        let name = config.name();
        match self {
            Self::Install => admin.install(name, config.display_name(), config.description()),
            Self::Remove => admin.remove(name),
            Self::Start => admin.start(name),
            Self::Stop => admin.stop(name),
            Self::Pause => admin.pause(name),
            Self::Continue => admin.resume(name),
        }
    }
}

/// Operations against the OS service registry.
pub trait ServiceAdmin: Send + Sync {
    /// 0 on success, -1 when the entry cannot be created, -2 when the executable path is
    /// unknown.
    fn install(&self, name: &str, display_name: &str, description: Option<&str>) -> i32;

    /// 0 on success, -3 when the entry cannot be opened, -4 when deletion fails.
    fn remove(&self, name: &str) -> i32;

    /// 1 once running, 0 otherwise, -5 when the entry cannot be opened, 6 when the start
    /// request is rejected.
    fn start(&self, name: &str) -> i32;

    /// Manager error code or 0; -5 when the entry cannot be opened.
    fn stop(&self, name: &str) -> i32;

    fn pause(&self, name: &str) -> i32;

    fn resume(&self, name: &str) -> i32;

    /// Delivers the reload control to the running service. Same codes as `stop`.
    fn reload(&self, name: &str) -> i32;
}

/// Administration backend for the current platform, if it has a service manager.
pub fn platform_admin() -> Option<Box<dyn ServiceAdmin>> {
    #[cfg(windows)]
    {
        Some(Box::new(scm::ScmAdmin))
    }
    #[cfg(not(windows))]
    {
        None
    }
}

#[cfg(windows)]
pub use scm::ScmAdmin;

#[cfg(windows)]
mod scm {
    use std::{
        env,
        ffi::OsString,
        thread,
        time::{Duration, Instant},
    };

    use tracing::{debug, info, warn};
    use windows_service::{
        service::{
            Service, ServiceAccess, ServiceControl, ServiceErrorControl, ServiceInfo,
            ServiceStartType, ServiceState, ServiceType, UserEventCode,
        },
        service_manager::{ServiceManager, ServiceManagerAccess},
    };

    use super::ServiceAdmin;
    use crate::bridge::RELOAD_CONTROL;

    const MIN_POLL: Duration = Duration::from_secs(1);
    const MAX_POLL: Duration = Duration::from_secs(10);

    /// Administration through the Windows Service Control Manager.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ScmAdmin;

    fn os_code(err: &windows_service::Error) -> i32 {
        match err {
            windows_service::Error::Winapi(io) => io.raw_os_error().unwrap_or(-1),
            _ => -1,
        }
    }

    fn manager(access: ServiceManagerAccess) -> Option<ServiceManager> {
        ServiceManager::local_computer(None::<&str>, access)
            .map_err(|err| warn!("cannot connect to the service control manager: {err}"))
            .ok()
    }

    fn open(name: &str, access: ServiceAccess) -> Option<Service> {
        manager(ServiceManagerAccess::CONNECT)?
            .open_service(name, access)
            .map_err(|err| warn!(service = name, "cannot open service: {err}"))
            .ok()
    }

    fn control(name: &str, access: ServiceAccess, code: ServiceControl) -> i32 {
        let Some(service) = open(name, access) else {
            return -5;
        };

        match service.notify(code) {
            Ok(status) => {
                debug!(service = name, state = ?status.current_state, "control delivered");
                0
            }
            Err(err) => {
                warn!(service = name, "control rejected: {err}");
                os_code(&err)
            }
        }
    }

    fn poll_interval(wait_hint: Duration) -> Duration {
        (wait_hint / 10).clamp(MIN_POLL, MAX_POLL)
    }

    impl ServiceAdmin for ScmAdmin {
        fn install(&self, name: &str, display_name: &str, description: Option<&str>) -> i32 {
            let Ok(executable_path) = env::current_exe() else {
                return -2;
            };
            let Some(manager) =
                manager(ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE)
            else {
                return -1;
            };

            let info = ServiceInfo {
                name: OsString::from(name),
                display_name: OsString::from(display_name),
                service_type: ServiceType::OWN_PROCESS,
                start_type: ServiceStartType::AutoStart,
                error_control: ServiceErrorControl::Normal,
                executable_path,
                launch_arguments: vec![],
                dependencies: vec![],
                account_name: None,
                account_password: None,
            };

            let service = match manager.create_service(&info, ServiceAccess::CHANGE_CONFIG) {
                Ok(service) => service,
                Err(err) => {
                    warn!(service = name, "install failed: {err}");
                    return -1;
                }
            };

            if let Some(description) = description
                && let Err(err) = service.set_description(description)
            {
                warn!(service = name, "failed to set description: {err}");
            }

            info!(service = name, "service installed");
            0
        }

        fn remove(&self, name: &str) -> i32 {
            let Some(service) = open(name, ServiceAccess::DELETE) else {
                return -3;
            };

            match service.delete() {
                Ok(()) => {
                    info!(service = name, "service removed");
                    0
                }
                Err(err) => {
                    warn!(service = name, "remove failed: {err}");
                    -4
                }
            }
        }

        fn start(&self, name: &str) -> i32 {
            let Some(service) = open(
                name,
                ServiceAccess::START | ServiceAccess::QUERY_STATUS,
            ) else {
                return -5;
            };

            if let Err(err) = service.start::<&str>(&[]) {
                warn!(service = name, "start request rejected: {err}");
                return 6;
            }

            let Ok(mut status) = service.query_status() else {
                return 0;
            };

            let mut last_progress = Instant::now();
            let mut checkpoint = status.checkpoint;
            while status.current_state == ServiceState::StartPending {
                thread::sleep(poll_interval(status.wait_hint));

                status = match service.query_status() {
                    Ok(status) => status,
                    Err(_) => break,
                };

                if status.checkpoint > checkpoint {
                    checkpoint = status.checkpoint;
                    last_progress = Instant::now();
                } else if last_progress.elapsed() > status.wait_hint {
                    warn!(service = name, "no start progress within the wait hint");
                    break;
                }
            }

            i32::from(status.current_state == ServiceState::Running)
        }

        fn stop(&self, name: &str) -> i32 {
            control(name, ServiceAccess::STOP, ServiceControl::Stop)
        }

        fn pause(&self, name: &str) -> i32 {
            control(name, ServiceAccess::PAUSE_CONTINUE, ServiceControl::Pause)
        }

        fn resume(&self, name: &str) -> i32 {
            control(name, ServiceAccess::PAUSE_CONTINUE, ServiceControl::Continue)
        }

        fn reload(&self, name: &str) -> i32 {
            let Ok(code) = UserEventCode::from_raw(RELOAD_CONTROL) else {
                return -1;
            };
            control(
                name,
                ServiceAccess::USER_DEFINED_CONTROL,
                ServiceControl::UserEvent(code),
            )
        }
    }

}
