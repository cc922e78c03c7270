//! BigQuery provider over the REST v2 API.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | list tables | `GET projects/{p}/datasets/{d}/tables` (paged) |
//! | table schema | `GET projects/{p}/datasets/{d}/tables/{t}` |
//! | run SQL | `POST projects/{p}/queries`, then `GET projects/{p}/queries/{job}` |
//!
//! Tables are qualified as `dataset.table`. `REPEATED` fields get the array
//! code regardless of their element type.

use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

use super::{compact_fields, float_to_json, gcp_auth};
use crate::config::BigQueryConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::models::{qualify, CompactTable, Row};
use crate::type_map::BIGQUERY_TYPES;

pub const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const PAGE_SIZE: u32 = 1000;
const POLL_TIMEOUT_MS: u64 = 10_000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

// ============ REST resources ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListItem {
    table_reference: TableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

/// The subset of a `Table` resource needed for compaction.
#[derive(Debug, Deserialize)]
pub struct TableResource {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schema: Option<TableSchema>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(default)]
    v: Value,
}

// ============ Client ============

/// Authenticated BigQuery REST client for one project.
#[derive(Clone)]
pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    location: Option<String>,
    token: String,
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl BigQueryClient {
    pub fn new(
        http: reqwest::Client,
        project_id: impl Into<String>,
        location: Option<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: API_BASE.to_string(),
            project_id: project_id.into(),
            location,
            token: token.into(),
        }
    }

    /// Point the client at another endpoint (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/projects/{}/{}", self.base_url, self.project_id, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ProviderResult<T> {
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> ProviderResult<T> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    /// Every table and view id in a dataset, following page tokens.
    pub async fn list_tables(&self, dataset: &str) -> ProviderResult<Vec<String>> {
        let path = format!("datasets/{}/tables", dataset);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("maxResults", PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: TableList = self.get_json(&path, &query).await?;
            names.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(names)
    }

    pub async fn get_table(&self, dataset: &str, table: &str) -> ProviderResult<TableResource> {
        self.get_json(&format!("datasets/{}/tables/{}", dataset, table), &[])
            .await
    }

    /// Run standard SQL and collect every result row.
    pub async fn query(&self, sql: &str) -> ProviderResult<Vec<Row>> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": POLL_TIMEOUT_MS,
            "maxResults": PAGE_SIZE,
            "formatOptions": { "useInt64Timestamp": true },
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }

        let mut resp: QueryResponse = self.post_json("queries", &body).await?;
        let mut rows = Vec::new();
        let mut schema = resp.schema.take();

        loop {
            if resp.job_complete {
                let fields = schema.as_ref().map(|s| s.fields.as_slice()).unwrap_or(&[]);
                rows.extend(resp.rows.iter().map(|r| row_to_json(fields, r)));
                if resp.page_token.as_deref().map_or(true, str::is_empty) {
                    break;
                }
            }

            let job = resp.job_reference.clone().ok_or_else(|| {
                ProviderError::Query("query response has no job reference".to_string())
            })?;
            let mut query = vec![
                ("timeoutMs", POLL_TIMEOUT_MS.to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
                ("formatOptions.useInt64Timestamp", "true".to_string()),
            ];
            if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
                query.push(("location", location.clone()));
            }
            if resp.job_complete {
                if let Some(token) = &resp.page_token {
                    query.push(("pageToken", token.clone()));
                }
            }

            tracing::debug!(job_id = %job.job_id, "polling query results");
            resp = self
                .get_json(&format!("queries/{}", job.job_id), &query)
                .await?;
            if resp.job_reference.is_none() {
                resp.job_reference = Some(job);
            }
            if schema.is_none() {
                schema = resp.schema.take();
            }
        }

        Ok(rows)
    }
}

async fn check_status(resp: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        status: status.as_u16(),
        body,
    })
}

// ============ Row decoding ============

fn row_to_json(fields: &[FieldSchema], row: &TableRow) -> Row {
    let mut out = Row::new();
    for (idx, cell) in row.f.iter().enumerate() {
        let (name, value) = match fields.get(idx) {
            Some(field) => (field.name.clone(), field_value(field, &cell.v)),
            None => (format!("f{}", idx), cell.v.clone()),
        };
        out.insert(name, value);
    }
    out
}

/// Convert a REST cell (values arrive as strings) into typed JSON.
fn field_value(field: &FieldSchema, raw: &Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    if field.is_repeated() {
        return match raw {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| scalar_value(field, item.get("v").unwrap_or(&Value::Null)))
                    .collect(),
            ),
            other => other.clone(),
        };
    }
    scalar_value(field, raw)
}

fn scalar_value(field: &FieldSchema, raw: &Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    match field.field_type.to_uppercase().as_str() {
        "RECORD" | "STRUCT" => {
            let cells = raw.get("f").and_then(Value::as_array);
            let mut out = Row::new();
            for (idx, sub) in field.fields.iter().enumerate() {
                let v = cells
                    .and_then(|c| c.get(idx))
                    .and_then(|c| c.get("v"))
                    .unwrap_or(&Value::Null);
                out.insert(sub.name.clone(), field_value(sub, v));
            }
            Value::Object(out)
        }
        _ => {
            let Some(text) = raw.as_str() else {
                return raw.clone();
            };
            decode_scalar(&field.field_type, text)
        }
    }
}

fn decode_scalar(field_type: &str, text: &str) -> Value {
    match field_type.to_uppercase().as_str() {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "FLOAT" | "FLOAT64" => text
            .parse::<f64>()
            .map(float_to_json)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "BOOLEAN" | "BOOL" => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        },
        // microseconds since the epoch (useInt64Timestamp)
        "TIMESTAMP" => text
            .parse::<i64>()
            .ok()
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_micros)
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or_else(|| Value::String(text.to_string())),
        "JSON" => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        _ => Value::String(text.to_string()),
    }
}

// ============ Provider ============

#[derive(Debug)]
pub struct BigQueryProvider {
    client: BigQueryClient,
}

impl BigQueryProvider {
    /// Authenticate and build a client. Credential problems fail here.
    pub async fn connect(config: &BigQueryConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        let token = match &config.credentials {
            Some(path) => gcp_auth::service_account_token(&http, path).await?,
            None if config.use_default_credentials => gcp_auth::default_token(&http).await?,
            None => {
                return Err(ProviderError::Config(
                    "credentials path required unless use_default_credentials is true"
                        .to_string(),
                ))
            }
        };

        Ok(Self::from_client(BigQueryClient::new(
            http,
            config.project_id.clone(),
            config.location.clone(),
            token,
        )))
    }

    pub fn from_client(client: BigQueryClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BigQueryClient {
        &self.client
    }

    pub async fn execute_query(&mut self, sql: &str) -> ProviderResult<Vec<Row>> {
        self.client.query(sql).await
    }

    pub async fn get_compact_tables(
        &mut self,
        dataset: &str,
        table_names: Option<&[String]>,
    ) -> ProviderResult<Vec<CompactTable>> {
        let names = match table_names {
            Some(names) => names.to_vec(),
            None => {
                let names = self.client.list_tables(dataset).await.map_err(|e| {
                    if e.is_not_found() {
                        ProviderError::NotFound(format!("dataset '{}'", dataset))
                    } else {
                        e
                    }
                })?;
                if names.is_empty() {
                    return Err(ProviderError::empty_schema(dataset));
                }
                names
            }
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let resource = self
                .client
                .get_table(dataset, &name)
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        ProviderError::table_not_found(dataset, &name)
                    } else {
                        e
                    }
                })?;

            let columns = resource
                .schema
                .unwrap_or_default()
                .fields
                .into_iter()
                .map(|field| {
                    let native = if field.is_repeated() {
                        "ARRAY".to_string()
                    } else {
                        field.field_type
                    };
                    (field.name, native)
                });

            tables.push(CompactTable::new(
                qualify(dataset, &name, true),
                resource.description.unwrap_or_default(),
                compact_fields(&BIGQUERY_TYPES, columns),
            ));
        }

        Ok(tables)
    }
}
