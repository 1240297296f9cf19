//! CLI tests for `diagrun run` and `diagrun info`.
//!
//! Spawns the diagrun binary against a fixture code root and checks exit
//! codes and the printed summaries.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use diagrun::exit_codes;
use diagrun::test_support::{Fixture, NCAR_FIELDLIST, pod_settings};
use wait_timeout::ChildExt;

const ONE_CASE: &str = r#"
[[case_list]]
CASENAME = "foo"
FIRSTYR = 1990
LASTYR = 2000
convention = "NCAR"
"#;

fn fixture() -> Fixture {
    let fixture = Fixture::new();
    fixture.add_convention("fieldlist_NCAR.jsonc", NCAR_FIELDLIST);
    fixture.add_pod(
        "convective_transition",
        &pod_settings(json!("atmos"), &["pr_var"]),
    );
    fixture.add_pod(
        "ENSO_MSE",
        &pod_settings(json!(["atmos", "ocean"]), &["pr_var", "ts_var"]),
    );
    fixture.write_settings(ONE_CASE);
    fixture
}

fn command(root: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_diagrun"));
    cmd.arg("--code-root")
        .arg(root)
        .args(args)
        .env_remove("DIAGRUN_CODE_ROOT")
        .env_remove("DIAGRUN_WORKING_DIR")
        .env_remove("DIAGRUN_OUTPUT_DIR")
        .env_remove("DIAGRUN_KEEP_TEMP")
        .env("RUST_LOG", "warn");
    cmd
}

fn diagrun(root: &Path, args: &[&str]) -> Output {
    command(root, args).output().expect("spawn diagrun")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn dry_run_exits_ok_and_prints_summary() {
    let fixture = fixture();
    let output = diagrun(fixture.root(), &["run", "--dry-run"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("foo / convective_transition: succeeded"));
    assert!(text.contains("foo / ENSO_MSE: succeeded"));
    assert!(text.contains("2 succeeded, 0 failed, 0 skipped"));
    assert!(
        fixture
            .output_dir()
            .join("diag_foo_1990_2000/config_save.json")
            .is_file()
    );
}

#[test]
fn command_line_case_replaces_empty_case_list() {
    let fixture = fixture();
    fixture.write_settings("");
    let output = diagrun(
        fixture.root(),
        &[
            "run",
            "--dry-run",
            "--pods",
            "convective_transition",
            "--casename",
            "bar",
            "--convention",
            "NCAR",
            "--firstyr",
            "1980",
            "--lastyr",
            "1985",
        ],
    );

    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    assert!(stdout(&output).contains("bar / convective_transition: succeeded"));
    assert!(fixture.output_dir().join("diag_bar_1980_1985").is_dir());
}

#[test]
fn unknown_pods_exit_with_config_code() {
    let fixture = fixture();
    let output = diagrun(fixture.root(), &["run", "--pods", "nonexistent"]);

    assert_eq!(output.status.code(), Some(exit_codes::CONFIG));
    assert!(stderr(&output).contains("no PODs selected"));
    assert!(!fixture.output_dir().exists());
}

#[test]
fn missing_diagnostics_dir_exits_with_config_code() {
    let fixture = fixture();
    fs::remove_dir_all(fixture.root().join("diagnostics")).expect("remove diagnostics");
    let output = diagrun(fixture.root(), &["run"]);

    assert_eq!(output.status.code(), Some(exit_codes::CONFIG));
    assert!(stderr(&output).contains("not found"));
}

#[test]
fn info_lists_pods_and_realms() {
    let fixture = fixture();

    let output = diagrun(fixture.root(), &["info"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("topics, pods, diagnostics, realms, atmos, ocean"));

    let output = diagrun(fixture.root(), &["info", "realms"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("atmos and ocean:\n  ENSO_MSE: test POD.\n"));

    let output = diagrun(fixture.root(), &["info", "ENSO_MSE"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("    ts (required) @ day frequency\n"));
}

#[test]
fn info_pods_reports_descriptors_that_failed_to_load() {
    let fixture = fixture();
    fixture.add_pod("broken", "{ not json");

    let output = diagrun(fixture.root(), &["info", "pods"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("  ENSO_MSE: test POD.\n"));
    assert!(text.contains("Diagnostics that failed to load:\n  broken: "));
}

#[cfg(unix)]
#[test]
fn interrupt_removes_case_temp_dir_and_exits_130() {
    let fixture = Fixture::new();
    fixture.add_convention("fieldlist_NCAR.jsonc", NCAR_FIELDLIST);
    let settings = json!({
        "settings": {
            "long_name": "sleeping POD",
            "realm": "atmos",
            "driver": "driver.sh",
            "program": "sh"
        },
        "varlist": [{"var_name": "pr_var", "freq": "day"}]
    });
    let descriptor = fixture.add_pod("sleeper", &settings.to_string());
    let pod_dir = descriptor.parent().expect("POD dir");
    fs::write(
        pod_dir.join("driver.sh"),
        "printf '%s %s' \"$$\" \"$CASE_TEMP_DIR\" > started.tmp\nmv started.tmp started\nexec sleep 30\n",
    )
    .expect("write driver");
    fixture.write_settings(ONE_CASE);

    let mut child = command(fixture.root(), &["run"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn diagrun");

    let marker = fixture.output_dir().join("diag_foo_1990_2000/sleeper/started");
    let deadline = Instant::now() + Duration::from_secs(20);
    while !marker.is_file() {
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("POD never started");
        }
        thread::sleep(Duration::from_millis(50));
    }
    let started = fs::read_to_string(&marker).expect("read marker");
    let (sleeper_pid, case_temp) = started.split_once(' ').expect("pid and temp dir");
    assert!(Path::new(case_temp).is_dir());

    let sent = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .expect("send SIGINT");
    assert!(sent.success());
    let status = child
        .wait_timeout(Duration::from_secs(20))
        .expect("wait for diagrun")
        .expect("diagrun exits after SIGINT");
    let _ = Command::new("kill").args(["-TERM", sleeper_pid]).status();

    assert_eq!(status.code(), Some(exit_codes::INTERRUPTED));
    assert!(!Path::new(case_temp).exists());
}

#[test]
fn info_unknown_topic_fails() {
    let fixture = fixture();
    let output = diagrun(fixture.root(), &["info", "bogus"]);

    assert_eq!(output.status.code(), Some(exit_codes::CONFIG));
    assert!(stderr(&output).contains("'bogus' not a recognized topic"));
}
