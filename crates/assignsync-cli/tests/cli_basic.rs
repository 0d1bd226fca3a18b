//! Basic CLI E2E tests.
//!
//! Each test runs the built binary with HOME pointed at a temp directory and
//! the offline memory calendar selected.

use std::process::Command;

use chrono::{Duration, Utc};
use tempfile::TempDir;

struct Sandbox {
    home: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Self {
            home: tempfile::tempdir().unwrap(),
        };
        sandbox.ok(&["config", "set", "sync.provider", "memory"]);
        sandbox
    }

    /// Run a CLI command and return (stdout, stderr, exit code).
    fn run(&self, args: &[&str]) -> (String, String, i32) {
        let output = Command::new(env!("CARGO_BIN_EXE_assignsync"))
            .args(args)
            .env("HOME", self.home.path())
            .env_remove("ASSIGNSYNC_ENV")
            .env("ASSIGNSYNC_LOG", "error")
            .output()
            .expect("Failed to execute CLI command");

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        (stdout, stderr, output.status.code().unwrap_or(-1))
    }

    fn ok(&self, args: &[&str]) -> String {
        let (stdout, stderr, code) = self.run(args);
        assert_eq!(code, 0, "{args:?} failed: {stderr}");
        stdout
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        serde_json::from_str(&self.ok(args)).expect("Failed to parse JSON output")
    }

    /// `assignment add` prints a header line, then the item.
    fn add(&self, extra: &[&str]) -> serde_json::Value {
        let start = (Utc::now() + Duration::days(3))
            .format("%Y-%m-%d %H:%M")
            .to_string();
        let mut args = vec!["assignment", "add", "Essay", "--start", start.as_str()];
        args.extend_from_slice(extra);
        let out = self.ok(&args);
        let (header, body) = out.split_once('\n').unwrap();
        assert!(header.starts_with("Assignment created:"));
        serde_json::from_str(body).unwrap()
    }
}

#[test]
fn test_config_path_is_under_home() {
    let sandbox = Sandbox::new();
    let path = sandbox.ok(&["config", "path"]);
    assert!(path.trim().ends_with(".config/assignsync/config.toml"));
    assert!(path.starts_with(sandbox.home.path().to_str().unwrap()));
}

#[test]
fn test_config_get_set_and_reset() {
    let sandbox = Sandbox::new();
    assert_eq!(sandbox.ok(&["config", "get", "sync.provider"]).trim(), "memory");

    sandbox.ok(&["config", "set", "sync.categories", "exam,quiz"]);
    let listed = sandbox.ok(&["config", "list"]);
    assert!(listed.contains("sync.window_past_days = 14"));

    let (_, stderr, code) = sandbox.run(&["config", "set", "sync.direction", "sideways"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));

    let (_, stderr, code) = sandbox.run(&["config", "get", "no.such.key"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"));

    sandbox.ok(&["config", "reset"]);
    assert_eq!(sandbox.ok(&["config", "get", "sync.provider"]).trim(), "google");
}

#[test]
fn test_add_pushes_to_calendar_and_sync_is_idempotent() {
    let sandbox = Sandbox::new();
    let item = sandbox.add(&["--course", "CS101", "--remind", "30"]);
    assert_eq!(item["sync_status"], "synced");
    assert!(item["external_event_id"].is_string());

    let report = sandbox.json(&["sync", "run"]);
    assert_eq!(report["outcome"], "success");
    assert_eq!(report["created_remote"], 0);
    assert_eq!(report["unchanged"], 1);

    let status = sandbox.json(&["sync", "status"]);
    assert_eq!(status["mapped_items"], 1);
    assert_eq!(status["pending_conflicts"], 0);

    let history = sandbox.json(&["sync", "history", "--limit", "5"]);
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[test]
fn test_update_complete_and_delete() {
    let sandbox = Sandbox::new();
    let item = sandbox.add(&[]);
    let id = item["id"].as_str().unwrap();

    sandbox.ok(&["assignment", "update", id, "--title", "Essay draft", "--location", "Room 4"]);
    let shown = sandbox.json(&["assignment", "show", id]);
    assert_eq!(shown["title"], "Essay draft");
    assert_eq!(shown["location"], "Room 4");

    sandbox.ok(&["assignment", "complete", id]);
    assert!(sandbox.json(&["assignment", "list"]).as_array().unwrap().is_empty());
    assert_eq!(
        sandbox.json(&["assignment", "list", "--all"]).as_array().unwrap().len(),
        1
    );

    sandbox.ok(&["assignment", "delete", id]);
    let (_, stderr, code) = sandbox.run(&["assignment", "show", id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_mapping_list_and_unlink() {
    let sandbox = Sandbox::new();
    let item = sandbox.add(&["--category", "exam"]);
    let id = item["id"].as_str().unwrap();

    let mappings = sandbox.json(&["mapping", "list"]);
    assert_eq!(mappings.as_array().unwrap().len(), 1);
    assert_eq!(mappings[0]["local_id"], id);

    sandbox.ok(&["mapping", "unlink", id]);
    assert!(sandbox.json(&["mapping", "list"]).as_array().unwrap().is_empty());
    assert_eq!(sandbox.json(&["assignment", "show", id])["sync_status"], "local");
}

#[test]
fn test_conflict_commands_without_conflicts() {
    let sandbox = Sandbox::new();
    assert!(sandbox.json(&["conflict", "list"]).as_array().unwrap().is_empty());

    let (_, stderr, code) = sandbox.run(&["conflict", "resolve", "missing", "local"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Conflict not found"));

    let (_, stderr, code) = sandbox.run(&["conflict", "auto"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("--policy"));

    assert_eq!(
        sandbox.ok(&["conflict", "auto", "--policy", "newest_wins"]).trim(),
        "0 conflict(s) resolved"
    );
}

#[test]
fn test_invalid_input_is_rejected() {
    let sandbox = Sandbox::new();
    let (_, stderr, code) = sandbox.run(&["assignment", "add", "Essay", "--start", "someday"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("cannot parse time"));

    let (_, _, code) = sandbox.run(&["assignment", "add", "Essay", "--start", "2026-11-02", "--category", "party"]);
    assert_eq!(code, 2);

    let (_, stderr, code) = sandbox.run(&[
        "assignment", "add", "Essay", "--start", "2026-11-02 09:00", "--end", "2026-11-02 08:00",
    ]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));

    let (_, stderr, code) = sandbox.run(&["sync", "run", "--past-days", "4000000000"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("out of range"));
}
