use axum::{routing::post, Json, Router};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn run_tabletalk(dir: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_tabletalk"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("failed to run tabletalk binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

async fn create_db(path: &Path) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();
    sqlx::raw_sql(
        "CREATE TABLE events (id INTEGER, kind TEXT, at TIMESTAMP);
         INSERT INTO events VALUES (1, 'click', '2024-01-01 00:00:00');",
    )
    .execute(&mut conn)
    .await
    .unwrap();
    conn.close().await.unwrap();
}

#[test]
fn test_init_scaffolds_project() {
    let tmp = TempDir::new().unwrap();

    let (stdout, stderr, ok) = run_tabletalk(tmp.path(), &["init", "proj"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("tabletalk.yaml"));

    let root = tmp.path().join("proj");
    assert!(root.join("tabletalk.yaml").is_file());
    assert!(root.join("contexts/default_context.yaml").is_file());
    assert!(root.join("manifest").is_dir());
}

#[test]
fn test_init_refuses_to_overwrite() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("tabletalk.yaml"), "mine").unwrap();

    let (_, stderr, ok) = run_tabletalk(tmp.path(), &["init"]);
    assert!(!ok);
    assert!(stderr.contains("already exists"), "{}", stderr);
    assert_eq!(
        fs::read_to_string(tmp.path().join("tabletalk.yaml")).unwrap(),
        "mine"
    );
}

#[tokio::test]
async fn test_apply_prints_summary() {
    let tmp = TempDir::new().unwrap();
    create_db(&tmp.path().join("app.db")).await;
    fs::write(
        tmp.path().join("tabletalk.yaml"),
        "provider:\n  type: sqlite\n  database_path: app.db\nname: activity\nschemas: [main]\n",
    )
    .unwrap();

    let (stdout, stderr, ok) = run_tabletalk(tmp.path(), &["apply", "--format", "text"]);
    assert!(ok, "apply failed: {}", stderr);
    assert!(stdout.contains("Applied 1 context(s), 1 table(s)."), "{}", stdout);

    let text = fs::read_to_string(tmp.path().join("manifest/activity.txt")).unwrap();
    assert!(text.contains("events||id:I|kind:S|at:TS"), "{}", text);
}

#[test]
fn test_apply_without_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_tabletalk(tmp.path(), &["apply"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

#[test]
fn test_completions() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, ok) = run_tabletalk(tmp.path(), &["completions", "bash"]);
    assert!(ok);
    assert!(stdout.contains("tabletalk"));
}

fn run_with_stdin(dir: &Path, args: &[&str], input: &[u8]) -> (String, String, bool) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tabletalk"))
        .current_dir(dir)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run tabletalk binary");
    child.stdin.take().unwrap().write_all(input).unwrap();
    let output = child.wait_with_output().unwrap();
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

async fn two_context_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    create_db(&tmp.path().join("app.db")).await;
    fs::write(
        tmp.path().join("tabletalk.yaml"),
        "provider:\n  type: sqlite\n  database_path: app.db\nllm:\n  provider: openai\n  api_key: sk-test\ncontexts: contexts\n",
    )
    .unwrap();
    let contexts = tmp.path().join("contexts");
    fs::create_dir_all(&contexts).unwrap();
    for name in ["alpha", "beta"] {
        fs::write(
            contexts.join(format!("{}.yaml", name)),
            format!("name: {}\ndatasets:\n  - name: main\n    tables: [events]\n", name),
        )
        .unwrap();
    }
    let (_, stderr, ok) = run_tabletalk(tmp.path(), &["apply"]);
    assert!(ok, "apply failed: {}", stderr);
    tmp
}

#[tokio::test]
async fn test_query_selects_manifest_by_number() {
    let tmp = two_context_project().await;

    let (stdout, stderr, ok) = run_with_stdin(tmp.path(), &["query"], b"2\nexit\n");
    assert!(ok, "{}", stderr);
    assert!(stdout.contains("1. alpha.json"), "{}", stdout);
    assert!(stdout.contains("2. beta.json"), "{}", stdout);
    assert!(stdout.contains("Using beta.json (1 tables)"), "{}", stdout);
}

#[tokio::test]
async fn test_query_reprompts_on_invalid_selection() {
    let tmp = two_context_project().await;

    let (stdout, stderr, ok) = run_with_stdin(tmp.path(), &["query"], b"7\nbeta\n1\nexit\n");
    assert!(ok, "{}", stderr);
    assert!(stdout.contains("Invalid selection '7'"), "{}", stdout);
    assert!(stdout.contains("Invalid selection 'beta'"), "{}", stdout);
    assert!(stdout.contains("Using alpha.json"), "{}", stdout);
}

#[tokio::test]
async fn test_query_without_selection_fails() {
    let tmp = two_context_project().await;

    let (stdout, stderr, ok) = run_with_stdin(tmp.path(), &["query"], b"");
    assert!(!ok);
    assert!(stderr.contains("No manifest selected"), "{}", stderr);
    assert!(!stdout.contains("Using"), "{}", stdout);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_query_reads_questions_from_stdin() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|Json(_body): Json<Value>| async {
            Json(json!({ "choices": [{ "message": { "content": "SELECT kind FROM events" } }] }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let tmp = TempDir::new().unwrap();
    create_db(&tmp.path().join("app.db")).await;
    fs::write(
        tmp.path().join("tabletalk.yaml"),
        format!(
            "provider:\n  type: sqlite\n  database_path: app.db\nllm:\n  provider: openai\n  api_key: sk-test\n  base_url: http://{}\nname: activity\nschemas: [main]\n",
            addr
        ),
    )
    .unwrap();
    let (_, stderr, ok) = run_tabletalk(tmp.path(), &["apply"]);
    assert!(ok, "apply failed: {}", stderr);

    let dir = tmp.path().to_path_buf();
    let output = tokio::task::spawn_blocking(move || {
        let mut child = Command::new(env!("CARGO_BIN_EXE_tabletalk"))
            .current_dir(&dir)
            .args(["query", "--execute"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        child
            .stdin
            .take()
            .unwrap()
            .write_all(b"what kinds of events are there?\nexit\nnever asked\n")
            .unwrap();
        child.wait_with_output().unwrap()
    })
    .await
    .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("activity.json"), "{}", stdout);
    assert_eq!(stdout.matches("SELECT kind FROM events").count(), 1, "{}", stdout);
    assert!(stdout.contains(r#"{"kind":"click"}"#), "{}", stdout);
    assert!(stdout.contains("(1 rows)"), "{}", stdout);
}
