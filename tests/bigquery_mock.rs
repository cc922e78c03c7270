use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tabletalk::provider::{BigQueryClient, BigQueryProvider, DatabaseProvider};

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer test-token")
}

async fn list_tables(
    headers: HeaderMap,
    Path((_project, dataset)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match (dataset.as_str(), params.get("pageToken").map(String::as_str)) {
        ("sales", None) => Json(json!({
            "tables": [{ "tableReference": { "tableId": "orders" } }],
            "nextPageToken": "page-2"
        }))
        .into_response(),
        ("sales", Some("page-2")) => Json(json!({
            "tables": [{ "tableReference": { "tableId": "customers" } }]
        }))
        .into_response(),
        ("empty", _) => Json(json!({})).into_response(),
        _ => (StatusCode::NOT_FOUND, "Not found: Dataset").into_response(),
    }
}

async fn get_table(Path((_project, dataset, table)): Path<(String, String, String)>) -> Response {
    match (dataset.as_str(), table.as_str()) {
        ("sales", "orders") => Json(json!({
            "description": "Checkout events",
            "schema": { "fields": [
                { "name": "order_id", "type": "INTEGER", "mode": "REQUIRED" },
                { "name": "placed_at", "type": "TIMESTAMP" },
                { "name": "tags", "type": "STRING", "mode": "REPEATED" },
                { "name": "shipping", "type": "RECORD", "fields": [
                    { "name": "city", "type": "STRING" }
                ]},
                { "name": "weird", "type": "INTERVAL" }
            ]}
        }))
        .into_response(),
        ("sales", "customers") => Json(json!({
            "schema": { "fields": [
                { "name": "id", "type": "INT64" },
                { "name": "vip", "type": "BOOL" }
            ]}
        }))
        .into_response(),
        _ => (StatusCode::NOT_FOUND, "Not found: Table").into_response(),
    }
}

async fn start_query(Json(body): Json<Value>) -> Response {
    assert_eq!(body["useLegacySql"], false);
    assert_eq!(body["formatOptions"]["useInt64Timestamp"], true);
    if body["query"] == "SELECT broken" {
        return (StatusCode::BAD_REQUEST, "Syntax error").into_response();
    }
    Json(json!({
        "jobComplete": false,
        "jobReference": { "jobId": "job-1", "location": "EU" }
    }))
    .into_response()
}

async fn query_results(
    Path((_project, job)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    assert_eq!(job, "job-1");
    assert_eq!(params.get("location").map(String::as_str), Some("EU"));
    match params.get("pageToken").map(String::as_str) {
        None => Json(json!({
            "jobComplete": true,
            "schema": { "fields": [
                { "name": "id", "type": "INTEGER" },
                { "name": "at", "type": "TIMESTAMP" },
                { "name": "tags", "type": "STRING", "mode": "REPEATED" }
            ]},
            "rows": [
                { "f": [{ "v": "1" }, { "v": "0" }, { "v": [{ "v": "x" }] }] }
            ],
            "pageToken": "rows-2"
        }))
        .into_response(),
        Some("rows-2") => Json(json!({
            "jobComplete": true,
            "rows": [
                { "f": [{ "v": "2" }, { "v": null }, { "v": [] }] }
            ]
        }))
        .into_response(),
        Some(other) => panic!("unexpected page token {}", other),
    }
}

async fn mock_provider() -> DatabaseProvider {
    let app = Router::new()
        .route("/projects/{project}/datasets/{dataset}/tables", get(list_tables))
        .route(
            "/projects/{project}/datasets/{dataset}/tables/{table}",
            get(get_table),
        )
        .route("/projects/{project}/queries", post(start_query))
        .route("/projects/{project}/queries/{job}", get(query_results));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = BigQueryClient::new(reqwest::Client::new(), "acme", None, "test-token")
        .with_base_url(format!("http://{}/", addr));
    DatabaseProvider::BigQuery(BigQueryProvider::from_client(client))
}

#[tokio::test]
async fn test_discovers_dataset_across_pages() {
    let mut provider = mock_provider().await;
    let tables = provider.get_compact_tables("sales", None).await.unwrap();

    let names: Vec<&str> = tables.iter().map(|t| t.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["sales.orders", "sales.customers"]);
    assert_eq!(tables[0].description, "Checkout events");
    assert_eq!(tables[1].description, "");

    let codes: Vec<(&str, &str)> = tables[0]
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.type_code.as_str()))
        .collect();
    assert_eq!(
        codes,
        vec![
            ("order_id", "I"),
            ("placed_at", "TS"),
            ("tags", "A"),
            ("shipping", "ST"),
            ("weird", "S"),
        ]
    );
}

#[tokio::test]
async fn test_missing_objects_are_not_found() {
    let mut provider = mock_provider().await;

    let err = provider.get_compact_tables("nope", None).await.unwrap_err();
    assert!(err.is_not_found(), "{}", err);

    let err = provider.get_compact_tables("empty", None).await.unwrap_err();
    assert!(err.is_not_found(), "{}", err);

    let wanted = vec!["ghost".to_string()];
    let err = provider
        .get_compact_tables("sales", Some(&wanted))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("sales.ghost"), "{}", err);
}

#[tokio::test]
async fn test_query_polls_and_pages() {
    let mut provider = mock_provider().await;
    let rows = provider.execute_query("SELECT * FROM sales.orders").await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], 1);
    assert_eq!(rows[0]["at"], "1970-01-01T00:00:00+00:00");
    assert_eq!(rows[0]["tags"], json!(["x"]));
    assert_eq!(rows[1]["id"], 2);
    assert!(rows[1]["at"].is_null());
}

#[tokio::test]
async fn test_query_error_carries_status() {
    let mut provider = mock_provider().await;
    let err = provider.execute_query("SELECT broken").await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("400"), "{}", msg);
    assert!(msg.contains("Syntax error"), "{}", msg);
}
