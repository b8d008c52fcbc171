//! POSIX daemonization and PID file bookkeeping.
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::error::ServiceError;

/// Detaches the process from its controlling terminal.
///
/// Double fork with a new session in between, then `umask(0)`, `chdir("/")`, stdin from
/// `/dev/null`, stdout and stderr to `log_file` (or `/dev/null`). The launching process
/// and the intermediate child exit with status 0. Must be called before any thread is
/// spawned.
#[cfg(unix)]
pub fn daemonize(log_file: Option<&Path>) -> Result<(), ServiceError> {
    use nix::{
        sys::stat::{Mode, umask},
        unistd::{ForkResult, chdir, fork, setsid},
    };
    use std::{fs::OpenOptions, os::unix::io::IntoRawFd, process};

    // Opened before chdir so relative paths still resolve against the launch directory.
    let output = match log_file {
        Some(path) => OpenOptions::new().create(true).append(true).open(path)?,
        None => OpenOptions::new().write(true).open("/dev/null")?,
    };
    let devnull = fs::File::open("/dev/null")?;

    if let ForkResult::Parent { .. } = unsafe { fork() }? {
        process::exit(0);
    }

    setsid()?;

    if let ForkResult::Parent { .. } = unsafe { fork() }? {
        process::exit(0);
    }

    umask(Mode::empty());
    chdir("/")?;

    let input_fd = devnull.into_raw_fd();
    let output_fd = output.into_raw_fd();
    unsafe {
        if libc::dup2(input_fd, libc::STDIN_FILENO) < 0
            || libc::dup2(output_fd, libc::STDOUT_FILENO) < 0
            || libc::dup2(output_fd, libc::STDERR_FILENO) < 0
        {
            return Err(io::Error::last_os_error().into());
        }
        libc::close(input_fd);
        libc::close(output_fd);
    }

    debug!(pid = process::id(), "detached from controlling terminal");
    Ok(())
}

/// Writes the current PID to `path`, creating parent directories as needed.
pub fn write_pid_file(path: &Path) -> Result<(), ServiceError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

/// Reads a PID previously written by [`write_pid_file`].
pub fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Removes the PID file when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> Result<Self, ServiceError> {
        write_pid_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove pid file {}: {err}", self.path.display()),
        }
    }
}
