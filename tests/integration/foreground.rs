#[path = "common/mod.rs"]
mod common;

use std::{fs, io::Write};

use common::{LineCollector, spawn_demo, wait_for_child};
use tempfile::tempdir;

#[test]
fn foreground_runs_callbacks_around_the_console_wait() {
    let mut child = spawn_demo(&["-f"]);
    let mut stdin = child.stdin.take().unwrap();
    let stdout = LineCollector::spawn(child.stdout.take().unwrap());
    let stderr = LineCollector::spawn(child.stderr.take().unwrap());

    stderr.wait_for("on_start called");
    assert_eq!(stderr.count("on_stop called"), 0);

    stdin.write_all(b"q\n").unwrap();
    let status = wait_for_child(&mut child);
    assert!(status.success(), "exit status: {status:?}");

    stderr.wait_for("on_stop called");
    stdout.wait_for("ExampleServ stopped");

    let output = stdout.text();
    let started = output.find("ExampleServ started").unwrap();
    let stopped = output.find("ExampleServ stopped").unwrap();
    assert!(started < stopped);
    assert!(
        stderr.position("on_start called").unwrap() < stderr.position("on_stop called").unwrap()
    );
    assert_eq!(stderr.count("on_stop called"), 1);
}

#[cfg(unix)]
#[test]
fn null_stdin_keeps_foreground_instance_running() {
    use std::{thread, time::Duration};

    use nix::sys::signal::Signal;

    let mut child = common::spawn_demo_without_input(&["-F"]);
    let stderr = LineCollector::spawn(child.stderr.take().unwrap());
    let stdout = LineCollector::spawn(child.stdout.take().unwrap());

    stderr.wait_for("on_start called");
    thread::sleep(Duration::from_millis(500));
    assert!(child.try_wait().unwrap().is_none(), "{}", stderr.text());
    assert_eq!(stderr.count("on_stop called"), 0);

    common::send_signal(child.id(), Signal::SIGTERM);
    assert!(wait_for_child(&mut child).success());
    stderr.wait_for("on_stop called");
    stdout.wait_for("ExampleServ stopped");
    assert_eq!(stderr.count("on_stop called"), 1);
}

#[cfg(unix)]
#[test]
fn termination_signal_stops_foreground_instance_once() {
    use nix::sys::signal::Signal;

    let mut child = spawn_demo(&["-f"]);
    // Held open so only the signal can end the console wait.
    let _stdin = child.stdin.take();
    let stderr = LineCollector::spawn(child.stderr.take().unwrap());
    let stdout = LineCollector::spawn(child.stdout.take().unwrap());

    stderr.wait_for("on_start called");
    common::send_signal(child.id(), Signal::SIGTERM);

    let status = wait_for_child(&mut child);
    assert!(status.success(), "exit status: {status:?}");
    stderr.wait_for("on_stop called");
    stdout.wait_for("ExampleServ stopped");
    assert_eq!(stderr.count("on_stop called"), 1);
}

#[cfg(unix)]
#[test]
fn reload_signal_keeps_foreground_instance_running() {
    use nix::sys::signal::Signal;

    let mut child = spawn_demo(&["-f"]);
    let mut stdin = child.stdin.take().unwrap();
    let stderr = LineCollector::spawn(child.stderr.take().unwrap());
    let _stdout = LineCollector::spawn(child.stdout.take().unwrap());

    stderr.wait_for("on_start called");
    common::send_signal(child.id(), Signal::SIGHUP);
    stderr.wait_for("on_signal called");
    assert!(child.try_wait().unwrap().is_none());
    assert_eq!(stderr.count("on_stop called"), 0);

    stdin.write_all(b"q").unwrap();
    assert!(wait_for_child(&mut child).success());
    stderr.wait_for("on_stop called");
}

#[cfg(target_os = "linux")]
#[test]
fn manifest_watch_reports_created_files() {
    let temp = tempdir().unwrap();
    let incoming = temp.path().join("incoming");
    fs::create_dir_all(&incoming).unwrap();
    let manifest = temp.path().join("service.yaml");
    fs::write(
        &manifest,
        "name: WatchServ\nwatch:\n  - incoming\n",
    )
    .unwrap();

    let mut child = spawn_demo(&["--config", manifest.to_str().unwrap(), "-f"]);
    let mut stdin = child.stdin.take().unwrap();
    let stderr = LineCollector::spawn(child.stderr.take().unwrap());
    let stdout = LineCollector::spawn(child.stdout.take().unwrap());

    stdout.wait_for("WatchServ started");
    stderr.wait_for("watching 1 of 1 directories");

    fs::write(incoming.join("report.csv"), "a,b\n").unwrap();
    let expected = format!(
        "IN_CREATE: {} report.csv [file]",
        incoming.canonicalize().unwrap().display()
    );
    stderr.wait_for(&expected);

    stdin.write_all(b"q").unwrap();
    assert!(wait_for_child(&mut child).success());
    stdout.wait_for("WatchServ stopped");
}
