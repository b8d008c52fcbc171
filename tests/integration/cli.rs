use assert_cmd::Command;
use predicates::boolean::PredicateBooleanExt;
use predicates::str::contains;
use std::fs;
use tempfile::tempdir;

fn demo() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sysvc-demo"));
    cmd.env("RUST_LOG", "info");
    cmd
}

#[test]
fn help_prints_usage_without_touching_the_service() {
    for flag in ["-h", "-H", "-?"] {
        demo()
            .arg(flag)
            .assert()
            .success()
            .stdout(contains("-f   Start the application as a console application"))
            .stdout(contains("-k   Reload configuration"))
            .stderr(contains("on_start called").not());
    }
}

#[cfg(not(windows))]
#[test]
fn admin_flags_are_not_offered_without_a_service_manager() {
    demo()
        .arg("-h")
        .assert()
        .success()
        .stdout(contains("Install the system service").not());

    // Without a backend the admin letters are unknown and fall through to usage.
    demo()
        .arg("-i")
        .assert()
        .success()
        .stdout(contains("-h   Show this help"));
}

#[test]
fn unknown_flags_print_usage() {
    demo()
        .args(["-z", "-q"])
        .assert()
        .success()
        .stdout(contains("-h   Show this help"))
        .stderr(contains("on_start called").not());
}

#[test]
fn first_recognised_flag_wins() {
    demo()
        .args(["-x", "-h", "-f"])
        .assert()
        .success()
        .stdout(contains("Show this help"))
        .stdout(contains("started").not());
}

#[test]
fn missing_manifest_fails_before_running() {
    let temp = tempdir().unwrap();
    demo()
        .arg("--config")
        .arg(temp.path().join("absent.yaml"))
        .arg("-h")
        .assert()
        .code(2)
        .stderr(contains("failed to build service configuration"));
}

#[test]
fn manifest_with_unset_variable_is_rejected() {
    let temp = tempdir().unwrap();
    let manifest = temp.path().join("service.yaml");
    fs::write(&manifest, "name: \"${SYSVC_CLI_SURELY_UNSET}\"\n").unwrap();

    demo()
        .arg("--config")
        .arg(&manifest)
        .arg("-h")
        .env_remove("SYSVC_CLI_SURELY_UNSET")
        .assert()
        .code(2)
        .stderr(contains("SYSVC_CLI_SURELY_UNSET"));
}

#[test]
fn log_level_flag_is_validated() {
    demo()
        .args(["--log-level", "loud", "-h"])
        .assert()
        .failure()
        .stderr(contains("invalid log level"));
}
