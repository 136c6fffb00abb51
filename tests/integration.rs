use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const UNSET_KEY_VAR: &str = "CLINRAG_TEST_UNSET_API_KEY";

fn clinrag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_clinrag"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[data]
notes_path = "{root}/data/notes.txt"

[index]
path = "{root}/index/clinical.sqlite"

[chunking]
chunk_size = 200
chunk_overlap = 40

[embedding]
provider = "hashing"
dims = 128

[retrieval]
mode = "similarity"
top_k = 3

[llm]
api_key_env = "{key}"
"#,
        root = root.display(),
        key = UNSET_KEY_VAR,
    );

    let config_path = config_dir.join("clinrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_clinrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = clinrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove(UNSET_KEY_VAR)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run clinrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn generate_and_build(config_path: &Path) {
    let (_, stderr, ok) = run_clinrag(config_path, &["generate", "--count", "15", "--seed", "7"]);
    assert!(ok, "generate failed: {}", stderr);
    let (_, stderr, ok) = run_clinrag(config_path, &["build"]);
    assert!(ok, "build failed: {}", stderr);
}

/// Index the checked-in sample notes (P001-P010, all three risk levels).
fn build_from_sample(root: &Path, config_path: &Path) {
    let sample = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/sample_clinical_notes.txt");
    fs::create_dir_all(root.join("data")).unwrap();
    fs::copy(sample, root.join("data/notes.txt")).unwrap();
    let (_, stderr, ok) = run_clinrag(config_path, &["build"]);
    assert!(ok, "build failed: {}", stderr);
}

#[test]
fn test_generate_writes_notes() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_clinrag(&config, &["generate", "--count", "5", "--seed", "1"]);
    assert!(ok, "generate failed: {}", stderr);
    assert!(stdout.contains("generate ok"));

    let text = fs::read_to_string(tmp.path().join("data/notes.txt")).unwrap();
    assert!(text.contains("PATIENT_ID: P001"));
    assert!(text.contains("PATIENT_ID: P005"));
    assert!(!text.contains("PATIENT_ID: P006"));
}

#[test]
fn test_generate_deterministic() {
    let (tmp, config) = setup_test_env();
    let a = tmp.path().join("a.txt");
    let b = tmp.path().join("b.txt");
    for out in [&a, &b] {
        let (_, stderr, ok) = run_clinrag(
            &config,
            &["generate", "--count", "8", "--seed", "99", "--out", out.to_str().unwrap()],
        );
        assert!(ok, "{}", stderr);
    }
    assert_eq!(fs::read_to_string(a).unwrap(), fs::read_to_string(b).unwrap());
}

#[test]
fn test_build_creates_index() {
    let (tmp, config) = setup_test_env();
    run_clinrag(&config, &["generate", "--count", "10"]);
    let (stdout, stderr, ok) = run_clinrag(&config, &["build"]);
    assert!(ok, "build failed: {}", stderr);
    assert!(stdout.contains("build ok"));
    assert!(stdout.contains("notes:   10"));
    assert!(stdout.contains("hashing-v1 (128 dims)"));
    assert!(stdout.contains("smoke query"));
    assert!(tmp.path().join("index/clinical.sqlite").exists());
}

#[test]
fn test_build_missing_notes_fails() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_clinrag(&config, &["build"]);
    assert!(!ok);
    assert!(stderr.contains("Notes file not found"), "{}", stderr);
    assert!(!tmp.path().join("index/clinical.sqlite").exists());
}

#[test]
fn test_build_malformed_notes_fails() {
    let (tmp, config) = setup_test_env();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(
        data.join("notes.txt"),
        "PATIENT_ID: P001\nRISK_LEVEL: EXTREME\nCHIEF_COMPLAINT: x\n",
    )
    .unwrap();
    let (_, stderr, ok) = run_clinrag(&config, &["build"]);
    assert!(!ok);
    assert!(stderr.contains("Malformed notes file"), "{}", stderr);
}

#[test]
fn test_rebuild_replaces_index() {
    let (_tmp, config) = setup_test_env();
    generate_and_build(&config);
    run_clinrag(&config, &["generate", "--count", "4"]);
    let (stdout, stderr, ok) = run_clinrag(&config, &["build"]);
    assert!(ok, "{}", stderr);
    assert!(stdout.contains("notes:   4"));

    let (stdout, _, _) = run_clinrag(&config, &["stats"]);
    assert!(stdout.contains("Notes:       4"), "{}", stdout);
}

#[test]
fn test_stats_reports_index() {
    let (_tmp, config) = setup_test_env();
    generate_and_build(&config);
    let (stdout, stderr, ok) = run_clinrag(&config, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("Notes:       15"));
    assert!(stdout.contains("hashing-v1"));
    assert!(stdout.contains("(15 patients)"));
    for level in ["HIGH", "MEDIUM", "LOW"] {
        assert!(stdout.contains(level), "missing {} row", level);
    }
}

#[test]
fn test_stats_missing_index_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_clinrag(&config, &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("Index not found"), "{}", stderr);
}

#[test]
fn test_search_returns_ranked_chunks() {
    let (_tmp, config) = setup_test_env();
    generate_and_build(&config);
    let (stdout, stderr, ok) = run_clinrag(&config, &["search", "chest pain troponin"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.contains("mode: similarity"));
    assert!(stdout.contains("1. ["));
    assert!(!stdout.contains("4. ["));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config) = setup_test_env();
    generate_and_build(&config);
    let (first, _, _) = run_clinrag(&config, &["search", "shortness of breath", "--mode", "diverse"]);
    let (second, _, _) = run_clinrag(&config, &["search", "shortness of breath", "--mode", "diverse"]);
    assert_eq!(first, second);
    assert!(first.contains("mode: diverse"));
}

#[test]
fn test_search_risk_filter() {
    let (tmp, config) = setup_test_env();
    build_from_sample(tmp.path(), &config);
    let (stdout, stderr, ok) =
        run_clinrag(&config, &["search", "patient", "--risk", "low", "--k", "50"]);
    assert!(ok, "{}", stderr);
    let ranked: Vec<&str> = stdout.lines().filter(|l| l.contains("] P")).collect();
    assert!(!ranked.is_empty());
    assert!(ranked.iter().all(|l| l.contains("/ LOW /")), "{}", stdout);
}

#[test]
fn test_search_patient_filter() {
    let (tmp, config) = setup_test_env();
    build_from_sample(tmp.path(), &config);
    let (stdout, stderr, ok) =
        run_clinrag(&config, &["search", "assessment and plan", "--patient", "p003"]);
    assert!(ok, "{}", stderr);
    let ranked: Vec<&str> = stdout.lines().filter(|l| l.contains("] P")).collect();
    assert!(!ranked.is_empty());
    assert!(ranked.iter().all(|l| l.contains("] P003 /")), "{}", stdout);
}

#[test]
fn test_stats_on_sample_notes() {
    let (tmp, config) = setup_test_env();
    build_from_sample(tmp.path(), &config);
    let (stdout, stderr, ok) = run_clinrag(&config, &["stats"]);
    assert!(ok, "{}", stderr);
    assert!(stdout.contains("(10 patients)"), "{}", stdout);
    assert!(stdout.contains("P001, P004, P007"), "{}", stdout);
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config) = setup_test_env();
    generate_and_build(&config);
    let (stdout, _, ok) = run_clinrag(&config, &["search", "   "]);
    assert!(ok);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_unknown_mode_errors() {
    let (_tmp, config) = setup_test_env();
    generate_and_build(&config);
    let (_, stderr, ok) = run_clinrag(&config, &["search", "x", "--mode", "fuzzy"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown search mode"), "{}", stderr);
}

#[test]
fn test_search_invalid_risk_rejected() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_clinrag(&config, &["search", "x", "--risk", "severe"]);
    assert!(!ok);
    assert!(stderr.contains("invalid risk level"), "{}", stderr);
}

#[test]
fn test_search_missing_index_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_clinrag(&config, &["search", "chest pain"]);
    assert!(!ok);
    assert!(stderr.contains("Run `clinrag build` first"), "{}", stderr);
}

#[test]
fn test_search_with_incompatible_embedder_fails() {
    let (tmp, config) = setup_test_env();
    generate_and_build(&config);
    let text = fs::read_to_string(&config).unwrap().replace("dims = 128", "dims = 64");
    let other = tmp.path().join("config/other.toml");
    fs::write(&other, text).unwrap();
    let (_, stderr, ok) = run_clinrag(&other, &["search", "chest pain"]);
    assert!(!ok);
    assert!(stderr.contains("Rebuild with `clinrag build`"), "{}", stderr);
}

#[test]
fn test_ask_without_api_key_fails() {
    let (_tmp, config) = setup_test_env();
    generate_and_build(&config);
    let (_, stderr, ok) = run_clinrag(&config, &["ask", "Which patients are high risk?"]);
    assert!(!ok);
    assert!(stderr.contains(UNSET_KEY_VAR), "{}", stderr);
}

#[test]
fn test_serve_missing_index_fails_before_key_check() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_clinrag(&config, &["serve"]);
    assert!(!ok);
    assert!(stderr.contains("Index not found"), "{}", stderr);
}

#[test]
fn test_explicit_missing_config_fails() {
    let (tmp, _) = setup_test_env();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, ok) = run_clinrag(&missing, &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}
