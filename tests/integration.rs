use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let source_dir = root.join("data").join("source");
    fs::create_dir_all(&source_dir).unwrap();
    fs::write(
        source_dir.join("crem.txt"),
        "CREM 計算企業的網路風險指數 (CRI)，協助團隊排定修補優先順序。",
    )
    .unwrap();
    fs::write(
        source_dir.join("phishing.txt"),
        "Phishing remains the most common initial access vector in 2025.",
    )
    .unwrap();
    fs::write(source_dir.join("ignored.bin"), [0u8, 1, 2, 3]).unwrap();

    let config_content = format!(
        r#"[paths]
data_dir = '{}'

[embedding]
provider = "hash"
dims = 256

[llm]
provider = "none"

[logging]
level = "warn"
"#,
        root.join("data").display()
    );
    let config_path = root.join("iqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_iqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_iqa"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run iqa");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_json(config_path: &Path, args: &[&str]) -> Value {
    let (stdout, stderr, success) = run_iqa(config_path, args);
    assert!(success, "{:?} failed: stdout={}, stderr={}", args, stdout, stderr);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("{:?} printed invalid JSON ({}): {}", args, e, stdout))
}

#[test]
fn test_update_then_noop() {
    let (_tmp, config_path) = setup_test_env();

    let first = run_json(&config_path, &["update"]);
    assert_eq!(first["status"], "updated");
    assert_eq!(first["processed_files"], 2);
    assert_eq!(first["vector_dim"], 256);
    assert!(first["file_changes"]["crem.txt"]["reasons"][0]
        .as_str()
        .unwrap()
        .contains("新文件"));

    let second = run_json(&config_path, &["update"]);
    assert_eq!(second["status"], "no_updates_needed");
    assert_eq!(second["vector_count"], first["vector_count"]);
}

#[test]
fn test_query_json_filters_text() {
    let (_tmp, config_path) = setup_test_env();
    run_json(&config_path, &["update"]);

    let results = run_json(
        &config_path,
        &["query", "什麼是 CRI", "--filter", "text", "--json"],
    );
    let results = results.as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["source"], "crem.txt");
    assert_eq!(results[0]["rank"], 1);
    assert!(results.iter().all(|r| r["content_type"] == "text"));
}

#[test]
fn test_ask_json_structured_answer() {
    let (_tmp, config_path) = setup_test_env();
    run_json(&config_path, &["update"]);

    let answer = run_json(&config_path, &["ask", "什麼是 CRI", "--json"]);
    assert_eq!(answer["status"], "success");
    assert_eq!(answer["generation_method"], "structured_formatted");
    assert_eq!(answer["llm_available"], false);
    assert_eq!(answer["system_type"], "IntelQaSystem");
    assert!(!answer["citations"].as_array().unwrap().is_empty());
}

#[test]
fn test_ask_without_index_is_no_results() {
    let (_tmp, config_path) = setup_test_env();

    let answer = run_json(&config_path, &["ask", "top risk events", "--json"]);
    assert_eq!(answer["status"], "no_results");
    assert_eq!(answer["vector_count"], 0);
}

#[test]
fn test_stats_reports_vectors() {
    let (_tmp, config_path) = setup_test_env();
    let summary = run_json(&config_path, &["update"]);

    let stats = run_json(&config_path, &["stats"]);
    assert_eq!(stats["system_type"], "IntelQaSystem");
    assert_eq!(stats["llm_available"], false);
    assert_eq!(stats["vector_count"], summary["vector_count"]);
}

#[test]
fn test_process_text_writes_chunks_for_build() {
    let (tmp, config_path) = setup_test_env();
    let chunks = tmp.path().join("chunks.json");
    let source = tmp.path().join("data").join("source").join("crem.txt");

    let report = run_json(
        &config_path,
        &[
            "process-text",
            source.to_str().unwrap(),
            "--output",
            chunks.to_str().unwrap(),
        ],
    );
    assert!(report["total_chunks"].as_u64().unwrap() >= 1);
    assert!(chunks.is_file());

    let built = run_json(
        &config_path,
        &["build", "--chunks", chunks.to_str().unwrap()],
    );
    assert_eq!(built["vector_count"], report["total_chunks"]);
    assert_eq!(built["vector_dim"], 256);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_iqa(&tmp.path().join("absent.toml"), &["stats"]);
    assert!(!success);
    assert!(!stderr.is_empty());
}
