use assert_cmd::Command;

fn tabwright() -> Command {
    let mut cmd = Command::cargo_bin("tabwright").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_page_commands() {
    let output = tabwright().arg("--help").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    for command in ["open", "eval", "screenshot", "query", "tabs"] {
        assert!(text.contains(command), "missing {command} in:\n{text}");
    }
}

#[test]
fn invalid_log_level_fails() {
    tabwright()
        .args(["--log-level", "chatty", "tabs"])
        .assert()
        .failure();
}

#[test]
fn non_websocket_url_is_rejected_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let output = tabwright()
        .args(["--config"])
        .arg(dir.path().join("none.yaml"))
        .args(["--ws-url", "http://127.0.0.1:9222", "tabs"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ws:// or wss://"), "{stderr}");
}

#[test]
fn malformed_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tabwright.yaml");
    std::fs::write(&path, "browser: [1, 2]\n").unwrap();
    let output = tabwright().arg("--config").arg(&path).arg("tabs").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config file"), "{stderr}");
}
