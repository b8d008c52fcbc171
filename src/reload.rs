//! Reload relay for `-k`: finds the running instance of this executable and asks it to
//! run its `on_signal` callback.
use std::{ffi::OsStr, path::Path};

use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::{config::ServiceConfig, daemon::read_pid_file};

/// Picks the process to signal among `candidates` (pid, process name).
///
/// A live `preferred` PID other than our own wins when it still runs this executable;
/// otherwise the first other process whose name equals `own_name`. A preferred PID that now
/// belongs to another program (the PID file outlived its daemon) is ignored.
pub fn select_target<'a>(
    own_pid: u32,
    own_name: &OsStr,
    preferred: Option<u32>,
    candidates: impl IntoIterator<Item = (u32, &'a OsStr)>,
) -> Option<u32> {
    let mut by_name = None;
    for (pid, name) in candidates {
        if pid == own_pid {
            continue;
        }
        if name != own_name {
            continue;
        }
        if Some(pid) == preferred {
            return Some(pid);
        }
        if by_name.is_none() {
            by_name = Some(pid);
        }
    }
    by_name
}

/// Locates another running instance of the current executable.
pub fn find_running_instance(pid_file: Option<&Path>) -> Option<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let own_pid = sysinfo::get_current_pid().ok()?;
    let own_name = system.process(own_pid)?.name().to_os_string();
    let preferred = pid_file.and_then(read_pid_file);

    let mut candidates: Vec<(u32, &OsStr)> = system
        .processes()
        .iter()
        .map(|(pid, process)| (pid.as_u32(), process.name()))
        .collect();
    candidates.sort_by_key(|(pid, _)| *pid);

    select_target(own_pid.as_u32(), &own_name, preferred, candidates)
}

/// Delivers the reload request to the running instance. Always reports 0: a missing
/// instance is logged, not an error.
pub fn reload_running_instance(config: &ServiceConfig) -> i32 {
    let Some(target) = find_running_instance(config.pid_file()) else {
        warn!(service = %config.name(), "no running instance found to reload");
        return 0;
    };

    debug!(service = %config.name(), pid = target, "sending reload request");
    match deliver(target) {
        Ok(()) => info!(service = %config.name(), pid = target, "reload requested"),
        Err(err) => warn!(service = %config.name(), pid = target, "failed to deliver reload: {err}"),
    }
    0
}

#[cfg(unix)]
fn deliver(target: u32) -> Result<(), crate::error::ServiceError> {
    use nix::{sys::signal, unistd};

    let pid = i32::try_from(target).map_err(|_| nix::errno::Errno::ESRCH)?;
    signal::kill(unistd::Pid::from_raw(pid), signal::Signal::SIGHUP)?;
    Ok(())
}

#[cfg(not(unix))]
fn deliver(_target: u32) -> Result<(), crate::error::ServiceError> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "reload is delivered as a service control on this platform",
    )
    .into())
}
