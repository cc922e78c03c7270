//! Error types for database providers and manifest lookup.
//!
//! Everything above the provider layer works with `anyhow::Result`; the
//! provider layer keeps a typed error so callers can tell a missing table
//! apart from a dead connection. Manifest lookup does the same so the server
//! can tell a missing manifest apart from a bad name.

use thiserror::Error;

/// Errors raised by a [`DatabaseProvider`](crate::provider::DatabaseProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The backend could not be reached or refused the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Credentials could not be loaded or were rejected.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A named schema, dataset, or table does not exist (or has no tables).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend rejected a query.
    #[error("Query error: {0}")]
    Query(String),

    /// A REST call failed with a non-success status.
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// The provider configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Create a not-found error for a table inside a schema.
    pub fn table_not_found(schema: &str, table: &str) -> Self {
        if schema.is_empty() {
            Self::NotFound(format!("table '{}'", table))
        } else {
            Self::NotFound(format!("table '{}.{}'", schema, table))
        }
    }

    /// Create a not-found error for a schema without any tables or views.
    pub fn empty_schema(schema: &str) -> Self {
        Self::NotFound(format!("no tables found in schema '{}'", schema))
    }

    /// Whether this error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Http { status: 404, .. })
    }
}

impl From<sqlx::Error> for ProviderError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => Self::Connection(err.to_string()),
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors from looking up a manifest by file name.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The name is empty or has path components.
    #[error("Invalid manifest name: '{0}'")]
    InvalidName(String),

    #[error("Manifest not found: {0}")]
    NotFound(String),

    /// The file exists but could not be read or decoded.
    #[error("{0:#}")]
    Unreadable(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_not_found_message() {
        let err = ProviderError::table_not_found("public", "missing");
        assert_eq!(err.to_string(), "Not found: table 'public.missing'");
        assert!(err.is_not_found());

        let bare = ProviderError::table_not_found("", "missing");
        assert_eq!(bare.to_string(), "Not found: table 'missing'");
    }

    #[test]
    fn test_http_404_counts_as_not_found() {
        let err = ProviderError::Http {
            status: 404,
            body: "Not found: Dataset p:d".to_string(),
        };
        assert!(err.is_not_found());
        let err = ProviderError::Http {
            status: 500,
            body: String::new(),
        };
        assert!(!err.is_not_found());
    }
}
