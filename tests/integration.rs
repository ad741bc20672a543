use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kdesk_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kdesk"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let bucket = root.join("uploads").join("kb-uploads");
    fs::create_dir_all(&bucket).unwrap();
    fs::write(
        bucket.join("report.xlsx"),
        workbook(&[
            ("xl/sharedStrings.xml", r#"<sst><si><t>Name</t></si><si><t>Bonus</t></si><si><t>Kovács János</t></si></sst>"#),
            ("xl/worksheets/sheet1.xml", r#"<worksheet><sheetData>
                <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
                <row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>500000</v></c></row>
            </sheetData></worksheet>"#),
        ]),
    )
    .unwrap();
    fs::write(bucket.join("notes.txt"), "plain notes").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/kdesk.sqlite"

[server]
bind = "127.0.0.1:7341"

[logging]
level = "warn"

[storage]
backend = "filesystem"
root = "{root}/uploads"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kdesk.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn workbook(parts: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in parts {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn run_kdesk(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kdesk_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kdesk binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kdesk(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/kdesk.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_kdesk(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_kdesk(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_kdesk(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

#[test]
fn test_static_query_hit() {
    let (_tmp, config_path) = setup_test_env();
    run_kdesk(&config_path, &["init"]);

    let (stdout, stderr, success) = run_kdesk(&config_path, &["query", "Kovács bónusz 2023"]);
    assert!(success, "query failed: {}", stderr);
    assert!(stdout.contains("bonuszok_2023.xlsx"), "{}", stdout);
    assert!(stdout.contains("0.95"), "{}", stdout);
}

#[test]
fn test_static_query_miss_uses_no_match_payload() {
    let (_tmp, config_path) = setup_test_env();
    run_kdesk(&config_path, &["init"]);

    let (stdout, stderr, success) = run_kdesk(&config_path, &["query", "weather forecast"]);
    assert!(success, "query failed: {}", stderr);
    let body: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(body["source_document"], "no-match");
    assert_eq!(body["confidence"], 0.0);
    assert!(!body["content_snippet"].as_str().unwrap().is_empty());
}

#[test]
fn test_blank_query_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_kdesk(&config_path, &["init"]);

    let (_, stderr, success) = run_kdesk(&config_path, &["query", "   "]);
    assert!(!success);
    assert!(stderr.contains("must not be empty"), "{}", stderr);
}

#[test]
fn test_ingest_spreadsheet() {
    let (_tmp, config_path) = setup_test_env();
    run_kdesk(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_kdesk(&config_path, &["ingest", "kb-uploads", "report.xlsx"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Stored spreadsheet"), "{}", stdout);
}

#[test]
fn test_ingest_unsupported_is_skipped() {
    let (_tmp, config_path) = setup_test_env();
    run_kdesk(&config_path, &["init"]);

    let (stdout, _, success) = run_kdesk(&config_path, &["ingest", "kb-uploads", "notes.txt"]);
    assert!(success);
    assert!(stdout.contains("Skipped"), "{}", stdout);
}

#[test]
fn test_ingest_missing_object_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_kdesk(&config_path, &["init"]);

    let (_, stderr, success) = run_kdesk(&config_path, &["ingest", "kb-uploads", "gone.docx"]);
    assert!(!success);
    assert!(stderr.contains("download failed"), "{}", stderr);
}

#[test]
fn test_requests_list_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_kdesk(&config_path, &["init"]);

    let (stdout, _, success) = run_kdesk(&config_path, &["requests", "list"]);
    assert!(success);
    assert!(stdout.contains("No pending requests."));
}

#[test]
fn test_requests_complete_unknown_id() {
    let (_tmp, config_path) = setup_test_env();
    run_kdesk(&config_path, &["init"]);

    let (_, stderr, success) = run_kdesk(
        &config_path,
        &["requests", "complete", "does-not-exist", "--results", "[]"],
    );
    assert!(!success);
    assert!(stderr.contains("is not pending"), "{}", stderr);
}

#[test]
fn test_requests_complete_rejects_bad_json() {
    let (_tmp, config_path) = setup_test_env();
    run_kdesk(&config_path, &["init"]);

    let (_, stderr, success) = run_kdesk(
        &config_path,
        &["requests", "complete", "some-id", "--results", "{not json"],
    );
    assert!(!success);
    assert!(stderr.contains("--results"), "{}", stderr);
}
