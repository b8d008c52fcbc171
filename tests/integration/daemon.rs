#![cfg(unix)]

#[path = "common/mod.rs"]
mod common;

use std::fs;

use assert_cmd::Command;
use common::{
    demo_bin, is_process_alive, send_signal, wait_for_content, wait_for_path,
    wait_for_occurrences, wait_for_path_removed, wait_for_process_exit,
};
use nix::sys::signal::Signal;
use tempfile::tempdir;

#[test]
fn daemon_detaches_writes_pid_and_cleans_up_on_termination() {
    let temp = tempdir().unwrap();
    let manifest = temp.path().join("service.yaml");
    fs::write(
        &manifest,
        r#"
name: DaemonServ
pid_file: run/daemon.pid
log_file: daemon.log
"#,
    )
    .unwrap();
    let base = temp.path().canonicalize().unwrap();
    let pid_file = base.join("run/daemon.pid");
    let log_file = base.join("daemon.log");

    // The launching process exits as soon as the first fork succeeds.
    Command::new(demo_bin())
        .arg("--config")
        .arg(&manifest)
        .env("RUST_LOG", "info")
        .timeout(common::TIMEOUT)
        .assert()
        .success();

    wait_for_path(&pid_file);
    let pid: u32 = fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(is_process_alive(pid));
    wait_for_content(&log_file, "on_start called");

    send_signal(pid, Signal::SIGHUP);
    wait_for_content(&log_file, "on_signal called");

    // The pid file points `-k` at the daemon.
    Command::new(demo_bin())
        .arg("--config")
        .arg(&manifest)
        .arg("-k")
        .assert()
        .success();
    let log = wait_for_occurrences(&log_file, "on_signal called", 2);
    assert!(!log.contains("on_stop called"));

    send_signal(pid, Signal::SIGTERM);
    wait_for_path_removed(&pid_file);
    wait_for_process_exit(pid);

    let log = wait_for_content(&log_file, "on_stop called");
    assert_eq!(log.matches("on_stop called").count(), 1);
}
