//! SQLite provider: a single-file, single-schema backend.
//!
//! Table names are never schema-qualified and there is nowhere to store a
//! table description, so descriptions are always empty.

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row};

use super::{bytes_to_json, compact_fields, float_to_json};
use crate::config::SqliteConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::models::{CompactTable, Row as JsonRow};
use crate::type_map::SQLITE_TYPES;

const IN_MEMORY: &str = ":memory:";

#[derive(Debug)]
pub struct SqliteProvider {
    conn: SqliteConnection,
}

impl SqliteProvider {
    pub async fn connect(config: &SqliteConfig) -> ProviderResult<Self> {
        let path = config.database_path.clone();
        let options = if path.as_os_str() == IN_MEMORY {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            if !path.exists() {
                return Err(ProviderError::Connection(format!(
                    "SQLite database not found: {}",
                    path.display()
                )));
            }
            SqliteConnectOptions::new().filename(&path)
        };

        let conn = options
            .connect()
            .await
            .map_err(|e| ProviderError::Connection(format!("{}: {}", path.display(), e)))?;

        Ok(Self { conn })
    }

    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    pub async fn execute_query(&mut self, sql: &str) -> ProviderResult<Vec<JsonRow>> {
        let rows = sqlx::query(sql).fetch_all(&mut self.conn).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    /// `schema` is ignored: a SQLite file has one namespace.
    pub async fn get_compact_tables(
        &mut self,
        _schema: &str,
        table_names: Option<&[String]>,
    ) -> ProviderResult<Vec<CompactTable>> {
        let names = match table_names {
            Some(names) => names.to_vec(),
            None => {
                let names = self.list_tables().await?;
                if names.is_empty() {
                    return Err(ProviderError::empty_schema("main"));
                }
                names
            }
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns: Vec<(String, Option<String>)> = sqlx::query_as(
                "SELECT name, type FROM pragma_table_info(?) ORDER BY cid",
            )
            .bind(&name)
            .fetch_all(&mut self.conn)
            .await?;

            if columns.is_empty() {
                return Err(ProviderError::table_not_found("", &name));
            }

            let columns = columns.into_iter().map(|(col, declared)| {
                let declared = declared
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| "TEXT".to_string());
                (col, declared)
            });

            tables.push(CompactTable::new(
                name,
                String::new(),
                compact_fields(&SQLITE_TYPES, columns),
            ));
        }

        Ok(tables)
    }

    /// Tables and views in creation order, without SQLite's internal tables.
    async fn list_tables(&mut self) -> ProviderResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT name FROM sqlite_master
            WHERE type IN ('table', 'view')
              AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
            ORDER BY rowid
            "#,
        )
        .fetch_all(&mut self.conn)
        .await?;
        Ok(names)
    }

    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "error closing sqlite connection");
        }
    }
}

fn row_to_json(row: &SqliteRow) -> JsonRow {
    let mut out = JsonRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), value_at(row, idx));
    }
    out
}

/// SQLite values carry their own storage class, so try each in turn.
fn value_at(row: &SqliteRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(float_to_json).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(|b| bytes_to_json(&b)).unwrap_or(Value::Null);
    }
    Value::Null
}
