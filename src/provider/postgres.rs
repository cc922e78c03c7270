//! PostgreSQL provider.
//!
//! Columns come from `information_schema.columns`; existence and table
//! comments come from `pg_class`, which also sees views and partitioned
//! tables. An empty schema argument means `public`.

use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgTypeKind};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, ConnectOptions, Connection, Row, TypeInfo};

use super::{bytes_to_json, compact_fields, float_to_json};
use crate::config::{PortValue, PostgresConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::models::{qualify, CompactTable, Row as JsonRow};
use crate::type_map::POSTGRES_TYPES;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_SCHEMA: &str = "public";

#[derive(Debug)]
pub struct PostgresProvider {
    conn: PgConnection,
}

impl PostgresProvider {
    pub async fn connect(config: &PostgresConfig) -> ProviderResult<Self> {
        let port = PortValue::resolve(config.port.as_ref(), DEFAULT_PORT)
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let conn = options.connect().await.map_err(|e| {
            ProviderError::Connection(format!(
                "postgres://{}@{}:{}/{}: {}",
                config.user, config.host, port, config.database, e
            ))
        })?;

        Ok(Self { conn })
    }

    pub fn connection(&mut self) -> &mut PgConnection {
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
            DEFAULT_SCHEMA
        } else {
            schema
        };

        let names = match table_names {
            Some(names) => names.to_vec(),
            None => {
                let names = self.list_tables(schema).await?;
                if names.is_empty() {
                    return Err(ProviderError::empty_schema(schema));
                }
                names
            }
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let description = self.table_description(schema, &name).await?;

            let columns: Vec<(String, String)> = sqlx::query_as(
                r#"
                SELECT column_name::text, data_type::text
                FROM information_schema.columns
                WHERE table_schema = $1 AND table_name = $2
                ORDER BY ordinal_position
                "#,
            )
            .bind(schema)
            .bind(&name)
            .fetch_all(&mut self.conn)
            .await?;

            tables.push(CompactTable::new(
                qualify(schema, &name, true),
                description,
                compact_fields(&POSTGRES_TYPES, columns),
            ));
        }

        Ok(tables)
    }

    async fn list_tables(&mut self, schema: &str) -> ProviderResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1
              AND table_type IN ('BASE TABLE', 'VIEW', 'FOREIGN')
            ORDER BY table_name
            "#,
        )
        .bind(schema)
        .fetch_all(&mut self.conn)
        .await?;
        Ok(names)
    }

    /// Table comment, or `NotFound` when no such relation exists.
    async fn table_description(&mut self, schema: &str, table: &str) -> ProviderResult<String> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT obj_description(c.oid, 'pg_class')
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1
              AND c.relname = $2
              AND c.relkind IN ('r', 'v', 'p', 'f')
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(&mut self.conn)
        .await?;

        match row {
            Some((comment,)) => Ok(comment.unwrap_or_default()),
            None => Err(ProviderError::table_not_found(schema, table)),
        }
    }

    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "error closing postgres connection");
        }
    }
}

fn row_to_json(row: &PgRow) -> JsonRow {
    let mut out = JsonRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), value_at(row, idx));
    }
    out
}

/// Decode one cell into JSON by its Postgres type.
///
/// NUMERIC becomes a string to keep its precision. Undecodable values
/// become `null`.
fn value_at(row: &PgRow, idx: usize) -> Value {
    let type_info = row.columns()[idx].type_info().clone();

    macro_rules! get {
        ($ty:ty, $to_json:expr) => {
            match row.try_get::<Option<$ty>, _>(idx) {
                Ok(Some(v)) => $to_json(v),
                Ok(None) => Value::Null,
                Err(e) => {
                    tracing::debug!(column = idx, error = %e, "undecodable value");
                    Value::Null
                }
            }
        };
    }

    match type_info.name() {
        "BOOL" => get!(bool, Value::Bool),
        "INT2" => get!(i16, Value::from),
        "INT4" => get!(i32, Value::from),
        "INT8" => get!(i64, Value::from),
        "OID" => get!(sqlx::postgres::types::Oid, |o: sqlx::postgres::types::Oid| {
            Value::from(o.0)
        }),
        "FLOAT4" => get!(f32, |f: f32| float_to_json(f as f64)),
        "FLOAT8" => get!(f64, float_to_json),
        "NUMERIC" => get!(Decimal, |d: Decimal| Value::String(d.to_string())),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => {
            get!(String, Value::String)
        }
        "UUID" => get!(Uuid, |u: Uuid| Value::String(u.to_string())),
        "JSON" | "JSONB" => get!(Value, |v| v),
        "DATE" => get!(NaiveDate, |d: NaiveDate| Value::String(d.to_string())),
        "TIME" => get!(NaiveTime, |t: NaiveTime| Value::String(t.to_string())),
        "TIMESTAMP" => get!(NaiveDateTime, |t: NaiveDateTime| Value::String(
            t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
        )),
        "TIMESTAMPTZ" => get!(DateTime<Utc>, |t: DateTime<Utc>| Value::String(
            t.to_rfc3339()
        )),
        "BYTEA" => get!(Vec<u8>, |b: Vec<u8>| bytes_to_json(&b)),
        "BOOL[]" => get!(Vec<bool>, Value::from),
        "INT2[]" => get!(Vec<i16>, Value::from),
        "INT4[]" => get!(Vec<i32>, Value::from),
        "INT8[]" => get!(Vec<i64>, Value::from),
        "FLOAT8[]" => get!(Vec<f64>, |v: Vec<f64>| Value::Array(
            v.into_iter().map(float_to_json).collect()
        )),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => get!(Vec<String>, Value::from),
        _ if matches!(type_info.kind(), PgTypeKind::Enum(_)) => {
            // enum labels travel as plain UTF-8 in both wire formats
            match row.try_get_unchecked::<Option<String>, _>(idx) {
                Ok(v) => v.map(Value::String).unwrap_or(Value::Null),
                Err(_) => Value::Null,
            }
        }
        other => {
            tracing::debug!(column = idx, pg_type = other, "unsupported column type");
            Value::Null
        }
    }
}
