use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn strata_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("strata");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    )
    .unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    )
    .unwrap();
    fs::write(files_dir.join("skipped.rs"), "fn main() {}").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/strata.sqlite"

[chunking]
max_tokens = 700

[retrieval]
final_limit = 12

[timeouts]
lexical_ms = 2000
query_deadline_ms = 10000

[server]
bind = "127.0.0.1:7331"

[connectors.filesystem]
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []
follow_symlinks = false
"#,
        root = root.display(),
    );

    let config_path = config_dir.join("strata.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

struct Run {
    stdout: String,
    stderr: String,
    code: i32,
}

impl Run {
    fn ok(&self) -> bool {
        self.code == 0
    }
}

fn run_strata(config_path: &Path, args: &[&str]) -> Run {
    let binary = strata_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run strata binary at {:?}: {}", binary, e));

    Run {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        code: output.status.code().unwrap_or(-1),
    }
}

fn synced_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let init = run_strata(&config_path, &["init"]);
    assert!(init.ok(), "init failed: {}", init.stderr);
    let sync = run_strata(&config_path, &["sync", "filesystem"]);
    assert!(sync.ok(), "sync failed: stdout={}, stderr={}", sync.stdout, sync.stderr);
    (tmp, config_path)
}

fn search_json(config_path: &Path, args: &[&str]) -> (i32, serde_json::Value) {
    let mut full = vec!["search"];
    full.extend_from_slice(args);
    full.push("--json");
    let run = run_strata(config_path, &full);
    let json = serde_json::from_str(&run.stdout)
        .unwrap_or_else(|e| panic!("bad JSON ({}): stdout={} stderr={}", e, run.stdout, run.stderr));
    (run.code, json)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let run = run_strata(&config_path, &["init"]);
    assert!(run.ok(), "init failed: stdout={}, stderr={}", run.stdout, run.stderr);
    assert!(run.stdout.contains("initialized"));
    assert!(tmp.path().join("data/strata.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    assert!(run_strata(&config_path, &["init"]).ok(), "First init failed");
    assert!(
        run_strata(&config_path, &["init"]).ok(),
        "Second init failed (not idempotent)"
    );
}

#[test]
fn test_missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let run = run_strata(&tmp.path().join("nope.toml"), &["init"]);
    assert_eq!(run.code, 1);
    assert!(run.stderr.contains("Failed to read config file"));
}

#[test]
fn test_sources_lists_connector() {
    let (_tmp, config_path) = setup_test_env();
    run_strata(&config_path, &["init"]);

    let run = run_strata(&config_path, &["sources"]);
    assert!(run.ok(), "sources failed: {}", run.stderr);
    assert!(run.stdout.contains("filesystem"));
    assert!(run.stdout.contains("OK"));
    assert!(run.stdout.contains("(none indexed)"));
}

#[test]
fn test_sync_filesystem() {
    let (_tmp, config_path) = setup_test_env();
    run_strata(&config_path, &["init"]);

    let run = run_strata(&config_path, &["sync", "filesystem"]);
    assert!(run.ok(), "sync failed: stdout={}, stderr={}", run.stdout, run.stderr);
    assert!(run.stdout.contains("fetched: 3 items"));
    assert!(run.stdout.contains("upserted documents: 3"));
    assert!(run.stdout.contains("ok"));
}

#[test]
fn test_sync_unchanged_files_are_skipped() {
    let (_tmp, config_path) = synced_env();

    let run = run_strata(&config_path, &["sync", "filesystem"]);
    assert!(run.ok());
    assert!(run.stdout.contains("unchanged: 3"));
    assert!(run.stdout.contains("upserted documents: 0"));
}

#[test]
fn test_sync_picks_up_edits() {
    let (tmp, config_path) = synced_env();

    fs::write(
        tmp.path().join("files/alpha.md"),
        "# Alpha Document\n\nRewritten: now about Zig and comptime.",
    )
    .unwrap();
    let run = run_strata(&config_path, &["sync", "filesystem"]);
    assert!(run.stdout.contains("upserted documents: 1"));
    assert!(run.stdout.contains("unchanged: 2"));

    let (_, json) = search_json(&config_path, &["comptime"]);
    assert_eq!(json["hits"][0]["path"], "alpha.md");
}

#[test]
fn test_sync_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_strata(&config_path, &["init"]);

    let run = run_strata(&config_path, &["sync", "filesystem", "--dry-run"]);
    assert!(run.ok());
    assert!(run.stdout.contains("items found: 3"));

    let sources = run_strata(&config_path, &["sources"]);
    assert!(sources.stdout.contains("(none indexed)"));
}

#[test]
fn test_sync_unknown_connector() {
    let (_tmp, config_path) = setup_test_env();
    run_strata(&config_path, &["init"]);

    let run = run_strata(&config_path, &["sync", "confluence"]);
    assert_eq!(run.code, 1);
    assert!(run.stderr.contains("Unknown connector"));
}

#[test]
fn test_search_finds_document() {
    let (_tmp, config_path) = synced_env();

    let run = run_strata(&config_path, &["search", "Rust programming"]);
    assert_eq!(run.code, 0, "stdout={} stderr={}", run.stdout, run.stderr);
    assert!(run.stdout.contains("alpha.md"));
    assert!(run.stdout.contains("query type:"));
}

#[test]
fn test_search_json_reports_strategies() {
    let (_tmp, config_path) = synced_env();

    let (code, json) = search_json(&config_path, &["kubernetes docker"]);
    assert_eq!(code, 0);
    assert_eq!(json["outcome"], "success");
    assert_eq!(json["hits"][0]["path"], "gamma.txt");

    let strategies = json["strategies"].as_array().unwrap();
    let semantic = strategies
        .iter()
        .find(|s| s["strategy"] == "semantic")
        .expect("semantic strategy reported");
    assert_eq!(semantic["status"], "skipped");
}

#[test]
fn test_search_fts_mode_and_limit() {
    let (_tmp, config_path) = synced_env();

    let (code, json) = search_json(&config_path, &["document", "--mode", "fts", "--limit", "1"]);
    assert_eq!(code, 0);
    assert_eq!(json["mode"], "fts");
    assert_eq!(json["hits"].as_array().unwrap().len(), 1);
}

#[test]
fn test_search_no_results_exits_3() {
    let (_tmp, config_path) = synced_env();

    let run = run_strata(&config_path, &["search", "zzqxwv"]);
    assert_eq!(run.code, 3, "stdout={} stderr={}", run.stdout, run.stderr);
    assert!(run.stdout.contains("No results."));
    assert!(run.stdout.contains("try:"));
}

#[test]
fn test_search_empty_query_is_an_error() {
    let (_tmp, config_path) = synced_env();

    let run = run_strata(&config_path, &["search", "  "]);
    assert_eq!(run.code, 1);
    assert!(run.stderr.contains("empty"));
}

#[test]
fn test_search_bad_mode_is_an_error() {
    let (_tmp, config_path) = synced_env();

    let run = run_strata(&config_path, &["search", "rust", "--mode", "telepathy"]);
    assert_eq!(run.code, 1);
}

#[test]
fn test_search_source_filter() {
    let (_tmp, config_path) = synced_env();

    let (code, json) = search_json(&config_path, &["document", "--source", "elsewhere"]);
    assert_eq!(code, 3);
    assert!(json["hits"].as_array().unwrap().is_empty());
}

#[test]
fn test_remove_source() {
    let (_tmp, config_path) = synced_env();

    let run = run_strata(&config_path, &["remove", "filesystem"]);
    assert!(run.ok(), "remove failed: stdout={}, stderr={}", run.stdout, run.stderr);
    assert!(run.stdout.contains("documents: 3"));

    let sources = run_strata(&config_path, &["sources"]);
    assert!(sources.stdout.contains("(none indexed)"));

    let after = run_strata(&config_path, &["search", "Rust programming"]);
    assert_eq!(after.code, 3);
}

#[test]
fn test_extract_status_and_disabled_run() {
    let (_tmp, config_path) = synced_env();

    let status = run_strata(&config_path, &["extract", "status"]);
    assert!(status.ok());
    assert!(status.stdout.contains("entities:   0"));

    let run = run_strata(&config_path, &["extract", "run"]);
    assert_eq!(run.code, 1);
    assert!(run.stderr.contains("extraction is disabled"));
}

#[test]
fn test_kag_without_entities() {
    let (_tmp, config_path) = synced_env();

    let run = run_strata(&config_path, &["kag", "Rust"]);
    assert!(run.ok(), "kag failed: {}", run.stderr);
    assert!(run.stdout.contains("No entities."));
}
