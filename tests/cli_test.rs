//! CLI smoke tests
//!
//! Exercises the `tus-s3-store` binary directly rather than the library,
//! checking the startup failure path a user actually hits from a shell.

use assert_cmd::Command;

#[test]
fn test_missing_config_file_exits_nonzero() {
    let mut cmd = Command::cargo_bin("tus-s3-store").unwrap();
    cmd.args(["--config", "/nonexistent/path/config.yaml"]);
    cmd.assert().failure();
}

#[test]
fn test_invalid_config_contents_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    std::fs::write(&config_path, "store:\n  bucket: \"\"\n").unwrap();

    let mut cmd = Command::cargo_bin("tus-s3-store").unwrap();
    cmd.args(["--config", config_path.to_str().unwrap()]);
    cmd.assert().failure();
}
