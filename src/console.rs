//! Foreground console support: the "exit requested" condition and the spinner.
use std::{
    io::{self, IsTerminal, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::debug;

use crate::{error::ServiceError, lifecycle::Lifecycle};

/// Interval between spinner frames.
pub const SPIN_INTERVAL: Duration = Duration::from_millis(100);

const FRAMES: [char; 4] = ['\\', '|', '/', '-'];

/// Condition the foreground loop polls between spinner frames.
pub trait ExitSignal: Send {
    /// Waits up to `timeout`; returns true once exit has been requested.
    fn wait(&mut self, timeout: Duration) -> Result<bool, ServiceError>;
}

/// Cycles through `\ | / -`.
#[derive(Debug, Default)]
pub struct Spinner {
    index: usize,
}

impl Spinner {
    pub fn next_frame(&mut self) -> char {
        let frame = FRAMES[self.index];
        self.index = (self.index + 1) % FRAMES.len();
        frame
    }
}

/// Redraws the spinner until `exit` fires or the controller is asked to stop by some
/// other path (signal, manager control).
pub fn spin_until_exit(
    exit: &mut dyn ExitSignal,
    lifecycle: &Lifecycle,
    out: &mut dyn Write,
) -> Result<(), ServiceError> {
    let mut spinner = Spinner::default();
    loop {
        write!(out, "\r{}", spinner.next_frame())?;
        out.flush()?;

        if exit.wait(SPIN_INTERVAL)? {
            debug!(service = %lifecycle.name(), "console exit requested");
            break;
        }
        if lifecycle.stop_requested() {
            break;
        }
    }
    writeln!(out, "\r ")?;
    Ok(())
}

/// Exit condition for an interactive console: any key press, Ctrl-C, or end of input.
///
/// On a terminal, line buffering and echo are switched off so a single key is enough; the
/// previous terminal settings are restored on drop. When stdin is not a terminal, a reader
/// thread fires the condition on the first byte or on end of input.
pub struct ConsoleExit {
    requested: Arc<AtomicBool>,
    terminal: Option<Terminal>,
}

impl ConsoleExit {
    /// Installs the Ctrl-C handler. Only one `ConsoleExit` can be created per process.
    pub fn new() -> Result<Self, ServiceError> {
        let requested = Arc::new(AtomicBool::new(false));

        let on_interrupt = Arc::clone(&requested);
        ctrlc::set_handler(move || on_interrupt.store(true, Ordering::SeqCst))?;

        let terminal = if io::stdin().is_terminal() {
            Some(Terminal::enter()?)
        } else {
            let on_input = Arc::clone(&requested);
            thread::Builder::new()
                .name("sysvc-stdin".into())
                .spawn(move || watch_input(io::stdin(), &on_input))?;
            None
        };

        Ok(Self {
            requested,
            terminal,
        })
    }
}

/// Flags `requested` once `input` yields a byte. End of input or a read error leaves the
/// flag alone: a detached stdin (`/dev/null`, a closed pipe) is not a request to exit.
fn watch_input<R: Read>(mut input: R, requested: &AtomicBool) {
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => {
                debug!("console input closed; waiting for a signal to exit");
                return;
            }
            Ok(_) => {
                requested.store(true, Ordering::SeqCst);
                return;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!("console input unreadable ({err}); waiting for a signal to exit");
                return;
            }
        }
    }
}

impl ExitSignal for ConsoleExit {
    fn wait(&mut self, timeout: Duration) -> Result<bool, ServiceError> {
        if self.requested.load(Ordering::SeqCst) {
            return Ok(true);
        }

        let pressed = match self.terminal.as_mut() {
            Some(terminal) => terminal.key_pressed(timeout)?,
            None => {
                thread::sleep(timeout);
                false
            }
        };

        Ok(pressed || self.requested.load(Ordering::SeqCst))
    }
}

#[cfg(unix)]
struct Terminal {
    saved: nix::sys::termios::Termios,
}

#[cfg(unix)]
impl Terminal {
    fn enter() -> Result<Self, ServiceError> {
        use nix::sys::termios::{LocalFlags, SetArg, tcgetattr, tcsetattr};

        let saved = tcgetattr(io::stdin())?;
        let mut keyed = saved.clone();
        keyed.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        tcsetattr(io::stdin(), SetArg::TCSANOW, &keyed)?;
        Ok(Self { saved })
    }

    fn key_pressed(&mut self, timeout: Duration) -> Result<bool, ServiceError> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut fds = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };

        let ready = unsafe { libc::poll(&mut fds, 1, millis) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err.into());
        }
        if ready == 0 {
            return Ok(false);
        }

        let mut byte = [0u8; 1];
        let _ = io::stdin().read(&mut byte);
        Ok(true)
    }
}

#[cfg(unix)]
impl Drop for Terminal {
    fn drop(&mut self) {
        use nix::sys::termios::{SetArg, tcsetattr};

        if let Err(err) = tcsetattr(io::stdin(), SetArg::TCSANOW, &self.saved) {
            debug!("failed to restore terminal settings: {err}");
        }
    }
}

#[cfg(windows)]
struct Terminal;

#[cfg(windows)]
impl Terminal {
    fn enter() -> Result<Self, ServiceError> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }

    fn key_pressed(&mut self, timeout: Duration) -> Result<bool, ServiceError> {
        use crossterm::event::{self, Event, KeyEventKind};

        if !event::poll(timeout)? {
            return Ok(false);
        }
        Ok(matches!(
            event::read()?,
            Event::Key(key) if key.kind == KeyEventKind::Press
        ))
    }
}

#[cfg(windows)]
impl Drop for Terminal {
    fn drop(&mut self) {
        if let Err(err) = crossterm::terminal::disable_raw_mode() {
            debug!("failed to restore console mode: {err}");
        }
    }
}
