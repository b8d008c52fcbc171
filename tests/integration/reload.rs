#[path = "common/mod.rs"]
mod common;

use std::io::Write;

use assert_cmd::Command;
use common::{LineCollector, demo_bin, spawn_demo, wait_for_child};
use predicates::str::contains;

// One test only: `-k` signals any other sysvc-demo process, so nothing else may run
// concurrently in this binary.
#[cfg(unix)]
#[test]
fn reload_flag_reaches_the_running_instance() {
    Command::new(demo_bin())
        .arg("-k")
        .assert()
        .success()
        .stderr(contains("no running instance found"));

    let mut child = spawn_demo(&["-f"]);
    let mut stdin = child.stdin.take().unwrap();
    let stderr = LineCollector::spawn(child.stderr.take().unwrap());
    let _stdout = LineCollector::spawn(child.stdout.take().unwrap());
    stderr.wait_for("on_start called");

    Command::new(demo_bin())
        .arg("-K")
        .assert()
        .success()
        .stderr(contains("reload requested"));

    stderr.wait_for("on_signal called");
    assert!(child.try_wait().unwrap().is_none());

    Command::new(demo_bin()).arg("-k").assert().success();
    stderr.wait_for_count("on_signal called", 2);
    assert_eq!(stderr.count("on_stop called"), 0);

    stdin.write_all(b"q").unwrap();
    assert!(wait_for_child(&mut child).success());
    stderr.wait_for("on_stop called");
}
