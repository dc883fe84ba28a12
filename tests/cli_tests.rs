//! Integration tests for the CLI interface
//!
//! Unix-only tests stand in a small shell script for ffmpeg. The script
//! ignores its arguments and speaks the progress protocol on stdout.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_cli_help_flag() {
    let mut cmd = Command::cargo_bin("ffprogress").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("--termination-timeout"))
        .stdout(predicate::str::contains("FFMPEG_COMMAND"));
}

#[test]
fn test_missing_command_is_a_usage_error() {
    let mut cmd = Command::cargo_bin("ffprogress").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_command_without_input_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("ffprogress").unwrap();
    cmd.current_dir(dir.path())
        .args(["--duration", "1", "--", "ffmpeg", "out.mp4"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid FFmpeg command"))
        .stderr(predicate::str::contains("'-i'"));
}

#[test]
fn test_unreadable_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("ffprogress").unwrap();
    cmd.current_dir(dir.path())
        .args(["--config", "missing.toml", "--", "ffmpeg", "-i", "a.mkv", "b.mp4"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_missing_transcoder_is_a_launch_failure() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("ffprogress").unwrap();
    cmd.current_dir(dir.path())
        .args([
            "--duration",
            "5",
            "--progress",
            "json",
            "--",
            "ffprogress-missing-transcoder",
            "-i",
            "a.mkv",
            "b.mp4",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Command not found: ffprogress-missing-transcoder"));
}

#[cfg(unix)]
mod fake_transcoder {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_json_progress_and_success() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            dir.path(),
            "printf 'out_time_ms=2500000\\nspeed=2.5x\\ntotal_size=4096\\nprogress=continue\\n'\n\
             echo 'Stream mapping:' >&2\n\
             printf 'out_time_ms=5000000\\nspeed=2.5x\\nprogress=end\\n'",
        );
        let log_file = dir.path().join("run.log");

        let mut cmd = Command::cargo_bin("ffprogress").unwrap();
        cmd.current_dir(dir.path())
            .arg("--duration")
            .arg("5")
            .arg("--progress")
            .arg("json")
            .arg("--log-file")
            .arg(&log_file)
            .arg("--")
            .arg(&script)
            .args(["-i", "clip.mkv", "clip.mp4"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"percentage\":50.0"))
            .stdout(predicate::str::contains("\"percentage\":100.0"))
            .stdout(predicate::str::contains("\"eta_seconds\":0.0"))
            .stderr(predicate::str::contains("Processed clip.mkv"));

        let log = std::fs::read_to_string(&log_file).unwrap();
        assert!(log.contains("Stream mapping:"));
        assert!(log.contains("-progress pipe:1 -nostats"));
        assert!(log.contains("state=succeeded return_code=0"));
    }

    #[test]
    fn test_failure_propagates_return_code_and_writes_default_log() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            dir.path(),
            "echo 'abc.webm: No such file or directory' >&2\nexit 3",
        );

        let mut cmd = Command::cargo_bin("ffprogress").unwrap();
        cmd.current_dir(dir.path())
            .args(["--duration", "10", "--progress", "json", "--"])
            .arg(&script)
            .args(["-i", "abc.webm", "out.mp4"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("Return code: 3"))
            .stderr(predicate::str::contains("abc.webm: No such file or directory"));

        let log = dir.path().join("ffmpeg_output").join("[abc.webm].txt");
        let contents = std::fs::read_to_string(log).unwrap();
        assert!(contents.contains("No such file or directory"));
    }

    #[test]
    fn test_unknown_duration_shows_notice() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "printf 'out_time_ms=1000000\\nprogress=end\\n'");
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "ffprobe = \"ffprogress-missing-ffprobe\"\n").unwrap();

        let mut cmd = Command::cargo_bin("ffprogress").unwrap();
        cmd.current_dir(dir.path())
            .arg("--config")
            .arg(&config)
            .args(["--progress", "json", "--"])
            .arg(&script)
            .args(["-i", "clip.mkv", "clip.mp4"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"percentage\":null"))
            .stderr(predicate::str::contains("improved progress stats will not be shown"));
    }
}
