use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tabletalk::config::{LlmConfig, LlmKind, ProviderKind};
use tabletalk::llm::{LlmProvider, SqlPrompt};

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

/// Serve `reply` with `status` on both chat endpoints and record every request.
async fn mock_server(status: StatusCode, reply: Value) -> (String, Recorded) {
    let recorded = Recorded::default();

    let handler = move |State(rec): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>| {
        let reply = reply.clone();
        async move {
            rec.requests.lock().unwrap().push((headers, body));
            (status, Json(reply))
        }
    };

    let app = Router::new()
        .route("/v1/chat/completions", post(handler.clone()))
        .route("/v1/messages", post(handler))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), recorded)
}

fn config(provider: LlmKind, base_url: &str) -> LlmConfig {
    LlmConfig {
        provider,
        api_key: "sk-test".to_string(),
        model: Some("test-model".to_string()),
        max_tokens: 300,
        temperature: 0.0,
        base_url: Some(base_url.to_string()),
        timeout_secs: 5,
    }
}

const SCHEMA: &str = r#"[{"t":"users","d":"","f":[{"n":"id","t":"I"}]}]"#;

#[tokio::test]
async fn test_openai_request_shape_and_trim() {
    let reply = json!({
        "choices": [{ "message": { "role": "assistant", "content": "  SELECT COUNT(*) FROM users;\n" } }]
    });
    let (base, recorded) = mock_server(StatusCode::OK, reply).await;
    let llm = LlmProvider::from_config(&config(LlmKind::OpenAi, &base)).unwrap();

    let prompt = SqlPrompt {
        kind: Some(ProviderKind::Postgres),
        schema: SCHEMA,
        question: "How many users?",
        ..Default::default()
    };
    let sql = llm.generate_sql(&prompt).await.unwrap();
    assert_eq!(sql, "SELECT COUNT(*) FROM users;");

    let requests = recorded.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (headers, body) = &requests[0];
    assert_eq!(headers["authorization"], "Bearer sk-test");
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["max_tokens"], 300);
    assert_eq!(body["temperature"], 0.0);
    assert_eq!(body["messages"][0]["role"], "system");
    assert!(body["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("PostgreSQL"));
    assert_eq!(body["messages"][1]["role"], "user");
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains(SCHEMA));
    assert!(user.contains("Question: How many users?"));
}

#[tokio::test]
async fn test_anthropic_request_shape_and_fence_stripping() {
    let reply = json!({
        "content": [{ "type": "text", "text": "```sql\nSELECT id FROM users\n```" }]
    });
    let (base, recorded) = mock_server(StatusCode::OK, reply).await;
    let llm = LlmProvider::from_config(&config(LlmKind::Anthropic, &base)).unwrap();
    assert_eq!(llm.kind(), LlmKind::Anthropic);
    assert_eq!(llm.model(), "test-model");

    let focus = vec!["users".to_string()];
    let prompt = SqlPrompt {
        kind: Some(ProviderKind::BigQuery),
        schema: SCHEMA,
        question: "List user ids",
        focus_tables: &focus,
        max_tokens: Some(64),
        ..Default::default()
    };
    let sql = llm.generate_sql(&prompt).await.unwrap();
    assert_eq!(sql, "SELECT id FROM users");

    let requests = recorded.requests.lock().unwrap();
    let (headers, body) = &requests[0];
    assert_eq!(headers["x-api-key"], "sk-test");
    assert_eq!(headers["anthropic-version"], "2023-06-01");
    assert_eq!(body["max_tokens"], 64);
    assert!(body["system"].as_str().unwrap().contains("BigQuery"));
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert!(body["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("Focus tables: users"));
}

#[tokio::test]
async fn test_generate_response_passes_prompt_through() {
    let reply = json!({ "choices": [{ "message": { "content": " hello \n" } }] });
    let (base, recorded) = mock_server(StatusCode::OK, reply).await;
    let llm = LlmProvider::from_config(&config(LlmKind::OpenAi, &base)).unwrap();

    assert_eq!(llm.generate_response("say hello").await.unwrap(), "hello");
    let requests = recorded.requests.lock().unwrap();
    assert_eq!(requests[0].1["messages"][1]["content"], "say hello");
}

#[tokio::test]
async fn test_non_success_status_is_error() {
    let reply = json!({ "error": { "message": "invalid api key" } });
    let (base, _) = mock_server(StatusCode::UNAUTHORIZED, reply).await;

    for kind in [LlmKind::OpenAi, LlmKind::Anthropic] {
        let llm = LlmProvider::from_config(&config(kind, &base)).unwrap();
        let err = llm.generate_response("hi").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("401"), "{}", msg);
        assert!(msg.contains("invalid api key"), "{}", msg);
    }
}

#[tokio::test]
async fn test_unset_api_key_variable_fails_before_request() {
    let mut cfg = config(LlmKind::OpenAi, "http://127.0.0.1:9");
    cfg.api_key = "${TABLETALK_TEST_DEFINITELY_UNSET}".to_string();
    let err = LlmProvider::from_config(&cfg).unwrap_err();
    assert!(format!("{:#}", err).contains("TABLETALK_TEST_DEFINITELY_UNSET"));
}
