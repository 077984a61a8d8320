use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn repolens_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("repolens");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/repolens.sqlite"

[embedding]
provider = "disabled"
dims = 8

[ingest]
work_dir = "{}"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("repolens.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_repolens(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = repolens_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run repolens binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_repolens(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/repolens.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_repolens(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_repolens(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_status_of_unknown_repository() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_repolens(&config_path, &["status", "https://git.example.com/none.git"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("entries: 0"));
}

#[test]
fn test_sync_deletions_only_needs_no_hosting_api() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_repolens(
        &config_path,
        &[
            "sync",
            "https://git.example.com/shop.git",
            "--project",
            "group/shop",
            "--deleted",
            "src/Gone.java",
        ],
    );
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_sync_without_changes_is_a_no_op() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_repolens(
        &config_path,
        &["sync", "https://git.example.com/shop.git", "--project", "group/shop"],
    );
    assert!(success);
    assert!(stdout.contains("Nothing to sync."));
}

#[test]
fn test_ingest_of_missing_repository_fails() {
    let (tmp, config_path) = setup_test_env();
    let url = format!("file://{}/no-such-repo", tmp.path().display());

    let (_, stderr, success) = run_repolens(&config_path, &["ingest", &url]);
    assert!(!success);
    assert!(stderr.contains("not accessible"), "stderr={}", stderr);
}

#[test]
fn test_search_errors_when_embeddings_disabled() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_repolens(
        &config_path,
        &["search", "https://git.example.com/shop.git", "order total"],
    );
    assert!(!success);
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_repolens(&config_path, &["search", "https://git.example.com/shop.git", "  "]);
    assert!(!success);
    assert!(stderr.contains("must not be empty"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(
        &bad,
        "[db]\npath = \"x.sqlite\"\n\n[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n",
    )
    .unwrap();

    let (_, stderr, success) = run_repolens(&bad, &["init"]);
    assert!(!success);
    assert!(stderr.contains("overlap_tokens"));
}
