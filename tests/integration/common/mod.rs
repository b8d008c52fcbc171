#![allow(dead_code)]

use std::{
    fs,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn demo_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sysvc-demo"))
}

/// Spawns the demo binary with all three standard streams piped.
pub fn spawn_demo(args: &[&str]) -> Child {
    Command::new(demo_bin())
        .args(args)
        .env("RUST_LOG", "info")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn sysvc-demo")
}

/// Spawns the demo binary with stdin on the null device, as service managers and
/// containers without an attached console do.
pub fn spawn_demo_without_input(args: &[&str]) -> Child {
    Command::new(demo_bin())
        .args(args)
        .env("RUST_LOG", "info")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn sysvc-demo")
}

/// Collects the lines of a child stream on a background thread.
#[derive(Clone)]
pub struct LineCollector {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LineCollector {
    pub fn spawn<R: Read + Send + 'static>(stream: R) -> Self {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        thread::spawn(move || {
            for line in BufReader::new(stream).lines() {
                match line {
                    Ok(line) => sink.lock().unwrap().push(line),
                    Err(_) => break,
                }
            }
        });
        Self { lines }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn text(&self) -> String {
        self.lines().join("\n")
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lines().iter().position(|line| line.contains(needle))
    }

    pub fn wait_for(&self, needle: &str) {
        self.wait_for_count(needle, 1);
    }

    pub fn wait_for_count(&self, needle: &str, expected: usize) {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if self.count(needle) >= expected {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
        panic!(
            "Timed out waiting for {expected} x '{needle}' in:\n{}",
            self.text()
        );
    }
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_for_path_removed(path: &Path) {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if !path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {:?} to be removed", path);
}

/// Waits until `path` contains `needle`.
pub fn wait_for_content(path: &Path, needle: &str) -> String {
    wait_for_occurrences(path, needle, 1)
}

/// Waits until `path` contains `needle` at least `expected` times.
pub fn wait_for_occurrences(path: &Path, needle: &str, expected: usize) -> String {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let content = fs::read_to_string(path).unwrap_or_default();
        if content.matches(needle).count() >= expected {
            return content;
        }
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {expected} x '{needle}' in {:?}:\n{content}", path);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

pub fn wait_for_child(child: &mut Child) -> std::process::ExitStatus {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(status) = child.try_wait().expect("failed to poll child") {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("Timed out waiting for child {} to exit", child.id());
        }
        thread::sleep(Duration::from_millis(50));
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    // An exited daemon may linger as a zombie until its new parent reaps it.
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for PID {pid} to exit");
}

#[cfg(unix)]
pub fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal)
        .expect("failed to deliver signal");
}
