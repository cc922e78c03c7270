//! Database providers.
//!
//! A [`DatabaseProvider`] wraps exactly one live connection to one backend and
//! exposes the same operations for every backend:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | [`execute_query`](DatabaseProvider::execute_query) | run arbitrary SQL, rows as JSON objects |
//! | [`get_client`](DatabaseProvider::get_client) | borrow the underlying connection |
//! | [`get_database_type_map`](DatabaseProvider::get_database_type_map) | native type → code table |
//! | [`get_compact_tables`](DatabaseProvider::get_compact_tables) | introspect tables and views |
//!
//! Backends are variants of one enum, selected by the `type` tag of the
//! provider config:
//!
//! | Config `type` | Variant | Introspection source |
//! |---------------|---------|----------------------|
//! | `bigquery` | [`BigQueryProvider`] | REST `tables.list` / `tables.get` |
//! | `sqlite` | [`SqliteProvider`] | `sqlite_master` + `pragma_table_info` |
//! | `postgres` | [`PostgresProvider`] | `information_schema` + `pg_class` |
//! | `mysql` | [`MysqlProvider`] | `information_schema` |
//!
//! Every call is awaited to completion before the next one is issued; a
//! provider never runs work concurrently.

mod bigquery;
mod gcp_auth;
mod mysql;
mod postgres;
mod sqlite;

pub use bigquery::{BigQueryClient, BigQueryProvider};
pub use mysql::MysqlProvider;
pub use postgres::PostgresProvider;
pub use sqlite::SqliteProvider;

use sqlx::{MySqlConnection, PgConnection, SqliteConnection};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderResult;
use crate::models::{CompactField, CompactTable, Row};
use crate::type_map::{type_map_for, TypeMap};

/// A connected database backend.
#[derive(Debug)]
pub enum DatabaseProvider {
    BigQuery(BigQueryProvider),
    Sqlite(SqliteProvider),
    Postgres(PostgresProvider),
    Mysql(MysqlProvider),
}

/// Borrowed handle to a provider's live connection.
pub enum ClientHandle<'a> {
    BigQuery(&'a BigQueryClient),
    Sqlite(&'a mut SqliteConnection),
    Postgres(&'a mut PgConnection),
    Mysql(&'a mut MySqlConnection),
}

impl DatabaseProvider {
    /// Open a connection for an already env-resolved config.
    ///
    /// Connection and authentication failures surface here, not on first use.
    pub async fn connect(config: &ProviderConfig) -> ProviderResult<Self> {
        tracing::debug!(provider = %config.kind(), "connecting");
        Ok(match config {
            ProviderConfig::BigQuery(c) => Self::BigQuery(BigQueryProvider::connect(c).await?),
            ProviderConfig::Sqlite(c) => Self::Sqlite(SqliteProvider::connect(c).await?),
            ProviderConfig::Postgres(c) => Self::Postgres(PostgresProvider::connect(c).await?),
            ProviderConfig::Mysql(c) => Self::Mysql(MysqlProvider::connect(c).await?),
        })
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::BigQuery(_) => ProviderKind::BigQuery,
            Self::Sqlite(_) => ProviderKind::Sqlite,
            Self::Postgres(_) => ProviderKind::Postgres,
            Self::Mysql(_) => ProviderKind::Mysql,
        }
    }

    /// SQL dialect name, for prompts.
    pub fn dialect(&self) -> &'static str {
        self.kind().dialect()
    }

    /// Run caller-supplied SQL as-is and collect every row.
    pub async fn execute_query(&mut self, sql: &str) -> ProviderResult<Vec<Row>> {
        tracing::debug!(provider = %self.kind(), sql, "executing query");
        match self {
            Self::BigQuery(p) => p.execute_query(sql).await,
            Self::Sqlite(p) => p.execute_query(sql).await,
            Self::Postgres(p) => p.execute_query(sql).await,
            Self::Mysql(p) => p.execute_query(sql).await,
        }
    }

    /// Borrow the live connection for operations outside this abstraction.
    pub fn get_client(&mut self) -> ClientHandle<'_> {
        match self {
            Self::BigQuery(p) => ClientHandle::BigQuery(p.client()),
            Self::Sqlite(p) => ClientHandle::Sqlite(p.connection()),
            Self::Postgres(p) => ClientHandle::Postgres(p.connection()),
            Self::Mysql(p) => ClientHandle::Mysql(p.connection()),
        }
    }

    pub fn get_database_type_map(&self) -> &'static TypeMap {
        type_map_for(self.kind())
    }

    /// Introspect tables in `schema`.
    ///
    /// With `table_names == None` every table and view is discovered, and an
    /// empty schema is a `NotFound` error. With an explicit list, each name
    /// must exist. Unknown native types map to the string code.
    pub async fn get_compact_tables(
        &mut self,
        schema: &str,
        table_names: Option<&[String]>,
    ) -> ProviderResult<Vec<CompactTable>> {
        match self {
            Self::BigQuery(p) => p.get_compact_tables(schema, table_names).await,
            Self::Sqlite(p) => p.get_compact_tables(schema, table_names).await,
            Self::Postgres(p) => p.get_compact_tables(schema, table_names).await,
            Self::Mysql(p) => p.get_compact_tables(schema, table_names).await,
        }
    }

    /// Close the connection. Dropping the provider also closes it.
    pub async fn close(self) {
        match self {
            Self::BigQuery(_) => {}
            Self::Sqlite(p) => p.close().await,
            Self::Postgres(p) => p.close().await,
            Self::Mysql(p) => p.close().await,
        }
    }
}

/// Map `(column, native type)` pairs to compact fields.
pub(crate) fn compact_fields<I>(type_map: &TypeMap, columns: I) -> Vec<CompactField>
where
    I: IntoIterator<Item = (String, String)>,
{
    columns
        .into_iter()
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, native)| CompactField::new(name, type_map.code_for(&native)))
        .collect()
}

/// Render bytes for JSON rows.
pub(crate) fn bytes_to_json(bytes: &[u8]) -> serde_json::Value {
    use base64::Engine;
    serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Finite floats become JSON numbers; NaN and infinities become strings.
pub(crate) fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(f.to_string()))
}
