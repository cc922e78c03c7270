//! MySQL provider.
//!
//! A MySQL "schema" is a database. An empty schema argument falls back to the
//! database named in the connection settings.

use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::Decimal;
use sqlx::{Column, ConnectOptions, Connection, Row, TypeInfo};

use super::{bytes_to_json, compact_fields, float_to_json};
use crate::config::{MysqlConfig, PortValue};
use crate::error::{ProviderError, ProviderResult};
use crate::models::{qualify, CompactTable, Row as JsonRow};
use crate::type_map::MYSQL_TYPES;

const DEFAULT_PORT: u16 = 3306;

#[derive(Debug)]
pub struct MysqlProvider {
    database: String,
    conn: MySqlConnection,
}

impl MysqlProvider {
    pub async fn connect(config: &MysqlConfig) -> ProviderResult<Self> {
        let port = PortValue::resolve(config.port.as_ref(), DEFAULT_PORT)
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let conn = options.connect().await.map_err(|e| {
            ProviderError::Connection(format!(
                "mysql://{}@{}:{}/{}: {}",
                config.user, config.host, port, config.database, e
            ))
        })?;

        Ok(Self {
            database: config.database.clone(),
            conn,
        })
    }

    pub fn connection(&mut self) -> &mut MySqlConnection {
        &mut self.conn
    }

    pub async fn execute_query(&mut self, sql: &str) -> ProviderResult<Vec<JsonRow>> {
        let rows = sqlx::query(sql).fetch_all(&mut self.conn).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    pub async fn get_compact_tables(
        &mut self,
        schema: &str,
        table_names: Option<&[String]>,
    ) -> ProviderResult<Vec<CompactTable>> {
        let schema = if schema.is_empty() {
            self.database.clone()
        } else {
            schema.to_string()
        };

        let names = match table_names {
            Some(names) => names.to_vec(),
            None => {
                let names = self.list_tables(&schema).await?;
                if names.is_empty() {
                    return Err(ProviderError::empty_schema(&schema));
                }
                names
            }
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let description = self.table_description(&schema, &name).await?;

            // information_schema text columns can come back as binary strings
            let columns: Vec<(String, String)> = sqlx::query_as(
                r#"
                SELECT CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR)
                FROM information_schema.columns
                WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
                ORDER BY ORDINAL_POSITION
                "#,
            )
            .bind(&schema)
            .bind(&name)
            .fetch_all(&mut self.conn)
            .await?;

            tables.push(CompactTable::new(
                qualify(&schema, &name, true),
                description,
                compact_fields(&MYSQL_TYPES, columns),
            ));
        }

        Ok(tables)
    }

    async fn list_tables(&mut self, schema: &str) -> ProviderResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR)
            FROM information_schema.tables
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
            ORDER BY TABLE_NAME
            "#,
        )
        .bind(schema)
        .fetch_all(&mut self.conn)
        .await?;
        Ok(names)
    }

    /// `TABLE_COMMENT`, or `NotFound` when the table does not exist.
    async fn table_description(&mut self, schema: &str, table: &str) -> ProviderResult<String> {
        let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT CAST(TABLE_COMMENT AS CHAR), CAST(TABLE_TYPE AS CHAR)
            FROM information_schema.tables
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(&mut self.conn)
        .await?;

        match row {
            // MySQL reports the literal comment "VIEW" for every view
            Some((comment, kind)) => {
                let comment = comment.unwrap_or_default();
                if kind.as_deref() == Some("VIEW") && comment == "VIEW" {
                    Ok(String::new())
                } else {
                    Ok(comment)
                }
            }
            None => Err(ProviderError::table_not_found(schema, table)),
        }
    }

    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "error closing mysql connection");
        }
    }
}

fn row_to_json(row: &MySqlRow) -> JsonRow {
    let mut out = JsonRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), value_at(row, idx));
    }
    out
}

/// Decode one cell into JSON by its MySQL type.
///
/// DECIMAL becomes a string to keep its precision. Undecodable values
/// become `null`.
fn value_at(row: &MySqlRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_info().name().to_string();

    macro_rules! get {
        ($ty:ty, $to_json:expr) => {
            row.try_get::<Option<$ty>, _>(idx)
                .map(|v| v.map($to_json).unwrap_or(Value::Null))
        };
    }

    let decoded = if type_name.ends_with("UNSIGNED") {
        get!(u64, Value::from)
    } else {
        match type_name.as_str() {
            "BOOLEAN" => get!(bool, Value::Bool),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                get!(i64, Value::from)
            }
            "FLOAT" => get!(f32, |f: f32| float_to_json(f as f64)),
            "DOUBLE" => get!(f64, float_to_json),
            "DECIMAL" => get!(Decimal, |d: Decimal| Value::String(d.to_string())),
            "DATE" => get!(NaiveDate, |d: NaiveDate| Value::String(d.to_string())),
            "TIME" => get!(NaiveTime, |t: NaiveTime| Value::String(t.to_string())),
            "DATETIME" => get!(NaiveDateTime, |t: NaiveDateTime| Value::String(
                t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
            )),
            "TIMESTAMP" => get!(DateTime<Utc>, |t: DateTime<Utc>| Value::String(
                t.to_rfc3339()
            )),
            "JSON" => get!(Value, |v| v),
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB"
            | "BIT" | "GEOMETRY" => get!(Vec<u8>, |b: Vec<u8>| bytes_to_json(&b)),
            _ => get!(String, Value::String),
        }
    };

    match decoded {
        Ok(v) => v,
        // last resort for anything the typed decode rejected
        Err(_) => match row.try_get_unchecked::<Option<String>, _>(idx) {
            Ok(v) => v.map(Value::String).unwrap_or(Value::Null),
            Err(e) => {
                tracing::debug!(column = idx, mysql_type = %type_name, error = %e, "undecodable value");
                Value::Null
            }
        },
    }
}
