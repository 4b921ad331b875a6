use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cidx_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cidx"))
}

fn run_cidx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cidx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cidx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn write_config(root: &Path, embedding: &str) -> PathBuf {
    let config = format!(
        r#"[index]
registry_path = "{root}/data/registry.sqlite"
base_paths = ["{root}/files"]

{embedding}
"#,
        root = root.display(),
        embedding = embedding
    );
    let path = root.join("cidx.toml");
    fs::write(&path, config).unwrap();
    path
}

#[test]
fn help_lists_every_command() {
    let output = Command::new(cidx_binary()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["index", "search", "delete", "stats", "health", "rebuild", "outdated"] {
        assert!(stdout.contains(command), "missing '{}' in help:\n{}", command, stdout);
    }
}

#[test]
fn missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_cidx(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn unknown_provider_is_rejected_at_load() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "[embedding]\nprovider = \"bogus\"\n");
    let (_, stderr, success) = run_cidx(&config, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"), "stderr: {}", stderr);
}

#[test]
fn disabled_embeddings_fail_engine_startup() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    let config = write_config(tmp.path(), "");
    let (_, stderr, success) = run_cidx(&config, &["health"]);
    assert!(!success);
    assert!(
        stderr.contains("no embedding provider configured"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn missing_registry_path_is_a_parse_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("cidx.toml");
    fs::write(&path, "[index]\ncollection = \"docs\"\n").unwrap();
    let (_, stderr, success) = run_cidx(&path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to parse config file"), "stderr: {}", stderr);
}
