use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn opfuzz(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("opfuzz").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG").env_remove("OPFUZZ_CONFIG");
    cmd
}

fn write_config(dir: &Path, targets: &[&str], isolation: &str) -> std::path::PathBuf {
    let targets = targets.iter().map(|t| format!("{t:?}")).collect::<Vec<_>>().join(", ");
    let text = format!(
        r#"
[backend]
targets = [{targets}]
isolation = "{isolation}"
timeout_ms = 5000

[generation]
max_nodes = 4
dim_range = [1, 4]

[inference]
max_rank = 2
dim_max = 4
probe_budget = 64

[campaign]
root = {root:?}
time_budget = "2m"

[logging]
level = "warn"
"#,
        root = dir.join("out").to_string_lossy(),
    );
    let path = dir.join("opfuzz.toml");
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn help_lists_public_commands() {
    let dir = tempfile::tempdir().unwrap();
    opfuzz(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("fuzz"))
        .stdout(predicate::str::contains("infer"))
        .stdout(predicate::str::is_match(r"(?m)^\s+worker\s").unwrap().not());
}

#[test]
fn version_flag_works() {
    let dir = tempfile::tempdir().unwrap();
    opfuzz(dir.path()).arg("--version").assert().success().stdout(predicate::str::contains("opfuzz"));
}

#[test]
fn unknown_subcommand_fails() {
    let dir = tempfile::tempdir().unwrap();
    opfuzz(dir.path()).arg("frobnicate").assert().failure();
}

#[test]
fn unknown_config_key_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("opfuzz.toml"), "[backend]\ntargetz = [\"reference\"]\n").unwrap();
    opfuzz(dir.path())
        .args(["config", "check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("targetz"));
}

#[test]
fn unknown_backend_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &["reference", "tvm"], "thread");
    opfuzz(dir.path()).args(["config", "check"]).assert().code(2);
}

#[test]
fn config_show_prints_effective_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &["reference"], "thread");
    opfuzz(dir.path())
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[campaign]"))
        .stdout(predicate::str::contains("isolation = \"thread\""));
}

#[test]
fn config_check_accepts_defaults() {
    let dir = tempfile::tempdir().unwrap();
    opfuzz(dir.path())
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration is valid"));
}

#[test]
fn generate_emits_json_on_stdout() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &["reference", "reference-f32"], "process");
    let output = opfuzz(dir.path())
        .args(["generate", "--seed", "11", "--execute", "--json", "--output", "graph"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["seed"], 11);
    assert!(doc["fingerprint"].is_string());
    assert_eq!(doc["report"]["outcomes"].as_array().unwrap().len(), 2);
    assert!(doc["verdict"]["disposition"].is_string());
    assert!(dir.path().join("graph/graph.json").is_file());
    assert!(dir.path().join("graph/graph.dot").is_file());
}

#[test]
fn generate_accepts_declared_inputs() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &["reference"], "thread");
    opfuzz(dir.path())
        .args(["generate", "--seed", "2", "--input", "float32[2,3]"])
        .assert()
        .success()
        .stdout(predicate::str::contains("float32[2,3]"));
    opfuzz(dir.path()).args(["generate", "--input", "float32[2"]).assert().failure();
}

#[test]
fn fuzz_records_crashes_and_refuses_to_clobber() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &["reference", "faulty:panic"], "process");
    let run = || {
        let mut cmd = opfuzz(dir.path());
        cmd.args(["fuzz", "--name", "smoke", "--seed", "5", "--max-iterations", "3"]);
        cmd
    };
    run().assert().success().stdout(predicate::str::contains("campaign smoke"));

    let campaign = dir.path().join("out").join("smoke");
    assert!(campaign.join("state.json").is_file());
    assert!(std::fs::read_dir(campaign.join("bugs")).unwrap().next().is_some());

    run().assert().code(2);
    run().arg("--resume").assert().success();
}

#[test]
fn aborting_worker_is_recorded_as_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &["reference", "faulty:abort"], "process");
    opfuzz(dir.path())
        .args(["fuzz", "--name", "abort", "--seed", "3", "--max-iterations", "2"])
        .assert()
        .success();
    let bugs: Vec<String> = std::fs::read_dir(dir.path().join("out/abort/bugs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(!bugs.is_empty());
    assert!(bugs.iter().all(|name| name.ends_with("-crash")), "{bugs:?}");
}

#[test]
fn supervised_fuzz_completes() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &["reference"], "thread");
    opfuzz(dir.path())
        .args(["fuzz", "--name", "sup", "--max-iterations", "2", "--supervise", "--max-restarts", "1"])
        .assert()
        .success();
    let state: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("out/sup/state.json")).unwrap()).unwrap();
    assert_eq!(state["cursor"], 2);
}

#[test]
fn infer_writes_rule_file() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &["reference"], "thread");
    opfuzz(dir.path())
        .args(["infer", "--opset", "relu,add", "--output", "rules.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("relu"))
        .stdout(predicate::str::contains("add"));

    let rules: serde_json::Value = serde_json::from_slice(&std::fs::read(dir.path().join("rules.json")).unwrap()).unwrap();
    assert_eq!(rules["backend"], "reference");
    assert!(rules["operators"]["relu"].is_object());
}

#[test]
fn worker_answers_malformed_requests() {
    let dir = tempfile::tempdir().unwrap();
    opfuzz(dir.path())
        .args(["worker", "--backend", "reference"])
        .write_stdin("not json")
        .assert()
        .success()
        .stdout(predicate::str::contains("malformed request"));
}
