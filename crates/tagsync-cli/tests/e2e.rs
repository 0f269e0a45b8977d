//! End-to-end tests for the tagsync CLI.
//!
//! Tests invoke the `tagsync` binary as a subprocess against temporary
//! vaults. Nothing here talks to the real Readwise API.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const NOTE: &str = "---\ntitle: Advisory   # keep\ntags:\n  - security\n---\n\nPatched CVE-2023-1234 today.\n";
const MISSING_TOKEN_ENV: &str = "TAGSYNC_E2E_MISSING_TOKEN";

fn tagsync() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tagsync"));
    cmd.env_remove("RUST_LOG");
    cmd
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(extra_config: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let vault = dir.path().join("vault");
        fs::create_dir_all(vault.join(".obsidian")).unwrap();
        fs::write(vault.join("advisory.md"), NOTE).unwrap();
        fs::write(vault.join(".obsidian").join("ignored.md"), "CVE-2020-0001").unwrap();

        let config = format!(
            "obsidian_vault_path: '{}'\nauto_tags:\n  - pattern: 'CVE-(\\d{{4}}-\\d+)'\n    tag_format: 'CVE/{{match}}'\n  - pattern: '('\n    tag_format: 'broken'\n{extra_config}",
            vault.display()
        );
        fs::write(dir.path().join("config.yaml"), config).unwrap();
        Self { dir }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("config.yaml")
    }

    fn note(&self, name: &str) -> PathBuf {
        self.dir.path().join("vault").join(name)
    }

    fn run(&self, command: &str, flags: &[&str]) -> Output {
        tagsync()
            .arg(command)
            .arg("--config")
            .arg(self.config())
            .args(flags)
            .output()
            .unwrap()
    }
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn e2e_autotag_dry_run_previews_without_writing() {
    let fx = Fixture::new("");
    let output = fx.run("autotag", &["--format", "json"]);
    assert_success(&output);

    let json = stdout_json(&output);
    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["source_tag"], "CVE/2023-1234");
    assert_eq!(rows[0]["operation"], "add");
    assert_eq!(rows[0]["status"], "skipped-dry-run");
    assert_eq!(rows[0]["note"], "advisory.md");
    assert_eq!(json["summary"]["previewed"], 1);
    assert_eq!(json["diffs"][0]["note"], "advisory.md");

    assert_eq!(read(&fx.note("advisory.md")), NOTE);

    let csv = read(&fx.dir.path().join("tag_proposal.csv"));
    assert!(csv.starts_with("source_tag,target_tag,operation,confidence,status,note,detail\r\n"));
    assert!(csv.contains("CVE/2023-1234,,add,100,skipped-dry-run,advisory.md,"));
}

#[test]
fn e2e_autotag_apply_is_idempotent() {
    let fx = Fixture::new("");
    let first = fx.run("autotag", &["--apply", "--format", "json"]);
    assert_success(&first);
    assert_eq!(stdout_json(&first)["summary"]["applied"], 1);

    let expected = "---\ntitle: Advisory   # keep\ntags:\n  - security\n  - CVE/2023-1234\n---\n\nPatched CVE-2023-1234 today.\n";
    assert_eq!(read(&fx.note("advisory.md")), expected);

    let second = fx.run("autotag", &["--apply", "--format", "json"]);
    assert_success(&second);
    let json = stdout_json(&second);
    assert_eq!(json["summary"]["applied"], 0);
    assert_eq!(json["rows"][0]["status"], "skipped-noop");
    assert_eq!(read(&fx.note("advisory.md")), expected);
}

#[test]
fn e2e_dry_run_flag_wins_over_apply() {
    let fx = Fixture::new("");
    let output = fx.run("autotag", &["--apply", "--dry-run"]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("skipped-dry-run"));
    assert!(stdout.contains("1 previewed"));
    assert!(stdout.contains("--- a/advisory.md\n+++ b/advisory.md\n"), "stdout: {stdout}");
    assert!(stdout.contains("@@ -5,0 +5,1 @@\n+  - CVE/2023-1234\n"), "stdout: {stdout}");
    assert_eq!(read(&fx.note("advisory.md")), NOTE);
}

#[test]
fn e2e_apply_reports_failed_notes_and_exits_nonzero() {
    let fx = Fixture::new("");
    fs::write(fx.note("plain.md"), "CVE-2024-0002 without frontmatter\n").unwrap();

    let output = fx.run("autotag", &["--apply", "--format", "markdown"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed: plain.md"), "stderr: {stderr}");
    assert_eq!(read(&fx.note("plain.md")), "CVE-2024-0002 without frontmatter\n");
    assert!(read(&fx.note("advisory.md")).contains("CVE/2023-1234"));
}

#[test]
fn e2e_malformed_frontmatter_is_reported_as_failed() {
    let fx = Fixture::new("");
    let broken = "---\ntags: [x\nCVE-2024-0003 in an unclosed block\n";
    fs::write(fx.note("broken.md"), broken).unwrap();

    let preview = fx.run("autotag", &["--format", "json"]);
    assert_success(&preview);
    let json = stdout_json(&preview);
    let row = json["rows"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["note"] == "broken.md")
        .unwrap()
        .clone();
    assert_eq!(row["status"], "failed");
    assert!(row["detail"].as_str().unwrap().starts_with("malformed frontmatter"));

    let output = fx.run("autotag", &["--apply"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed: broken.md"), "stderr: {stderr}");
    assert_eq!(read(&fx.note("broken.md")), broken);
    assert!(read(&fx.dir.path().join("tag_proposal.csv")).contains(",failed,broken.md,"));
}

#[test]
fn e2e_missing_frontmatter_can_be_created() {
    let fx = Fixture::new("missing_frontmatter: create\n");
    fs::write(fx.note("plain.md"), "CVE-2024-0002 without frontmatter\n").unwrap();

    let output = fx.run("autotag", &["--apply"]);
    assert_success(&output);
    assert_eq!(
        read(&fx.note("plain.md")),
        "---\ntags:\n  - CVE/2024-0002\n---\nCVE-2024-0002 without frontmatter\n"
    );
}

#[test]
fn e2e_export_flag_overrides_config() {
    let fx = Fixture::new("");
    let export = fx.dir.path().join("reports").join("out.csv");
    let output = fx.run("autotag", &["--export", export.to_str().unwrap()]);
    assert_success(&output);
    assert!(read(&export).contains("CVE/2023-1234"));
    assert!(!fx.dir.path().join("tag_proposal.csv").exists());
}

#[test]
fn e2e_sync_without_token_fails_before_touching_the_vault() {
    let fx = Fixture::new(&format!("readwise_token_env: {MISSING_TOKEN_ENV}\n"));
    let output = tagsync()
        .env_remove(MISSING_TOKEN_ENV)
        .args(["sync", "--apply", "--config"])
        .arg(fx.config())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("readwise"), "stderr: {stderr}");
    assert!(stderr.contains(MISSING_TOKEN_ENV), "stderr: {stderr}");
    assert_eq!(read(&fx.note("advisory.md")), NOTE);
    assert!(!fx.dir.path().join("tag_proposal.csv").exists());
}

#[test]
fn e2e_sync_with_unreachable_source_fails() {
    let fx = Fixture::new("readwise_api_url: 'http://127.0.0.1:9'\nreadwise_token_env: TAGSYNC_E2E_TOKEN\n");
    let output = tagsync()
        .env("TAGSYNC_E2E_TOKEN", "not-a-real-token")
        .args(["sync", "--config"])
        .arg(fx.config())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("tag source 'readwise' unavailable"), "stderr: {stderr}");
}

#[test]
fn e2e_missing_config_explains_how_to_create_one() {
    let dir = TempDir::new().unwrap();
    let output = tagsync()
        .current_dir(dir.path())
        .arg("autotag")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config.yaml-default"), "stderr: {stderr}");
}

#[test]
fn e2e_default_template_is_used_when_config_is_missing() {
    let fx = Fixture::new("");
    fs::rename(fx.config(), fx.dir.path().join("config.yaml-default")).unwrap();
    let output = tagsync()
        .current_dir(fx.dir.path())
        .args(["autotag", "--format", "json"])
        .output()
        .unwrap();
    assert_success(&output);
    assert_eq!(stdout_json(&output)["rows"][0]["source_tag"], "CVE/2023-1234");
}

#[test]
fn e2e_completions_are_generated() {
    let output = tagsync().args(["completions", "bash"]).output().unwrap();
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("tagsync"));
}
