//! OAuth2 access tokens for the BigQuery REST API.
//!
//! Two entry points:
//!
//! - [`service_account_token`]: sign a JWT with a key file and exchange it.
//! - [`default_token`]: application default credentials, tried in order:
//!   `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud well-known file, then the
//!   GCE metadata server.
//!
//! Tokens are fetched once per provider and never refreshed.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// A credentials JSON file, discriminated by its `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

#[derive(Debug, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// Refresh-token credentials written by `gcloud auth application-default login`.
#[derive(Debug, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl CredentialsFile {
    pub fn load(path: &Path) -> ProviderResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Auth(format!(
                "cannot read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ProviderError::Auth(format!(
                "invalid credentials file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Exchange these credentials for an access token.
    pub async fn fetch_token(&self, http: &reqwest::Client) -> ProviderResult<String> {
        match self {
            CredentialsFile::ServiceAccount(key) => {
                let assertion = key.assertion(chrono::Utc::now().timestamp())?;
                request_token(
                    http,
                    &key.token_uri,
                    &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
                )
                .await
            }
            CredentialsFile::AuthorizedUser(user) => {
                request_token(
                    http,
                    &user.token_uri,
                    &[
                        ("grant_type", "refresh_token"),
                        ("client_id", user.client_id.as_str()),
                        ("client_secret", user.client_secret.as_str()),
                        ("refresh_token", user.refresh_token.as_str()),
                    ],
                )
                .await
            }
        }
    }
}

impl ServiceAccountKey {
    /// Signed RS256 JWT asserting this account for the BigQuery scope.
    pub fn assertion(&self, now: i64) -> ProviderResult<String> {
        let claims = Claims {
            iss: &self.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| ProviderError::Auth(format!("invalid service account key: {}", e)))?;
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ProviderError::Auth(format!("failed to sign assertion: {}", e)))
    }
}

async fn request_token(
    http: &reqwest::Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> ProviderResult<String> {
    let resp = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .map_err(|e| ProviderError::Auth(format!("token request failed: {}", e)))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Auth(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    let token: TokenResponse = resp
        .json()
        .await
        .map_err(|e| ProviderError::Auth(format!("invalid token response: {}", e)))?;
    Ok(token.access_token)
}

/// Access token from a service-account key file.
pub async fn service_account_token(http: &reqwest::Client, path: &Path) -> ProviderResult<String> {
    CredentialsFile::load(path)?.fetch_token(http).await
}

/// Access token from application default credentials.
pub async fn default_token(http: &reqwest::Client) -> ProviderResult<String> {
    if let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
        if !path.is_empty() {
            tracing::debug!(path = %path, "using GOOGLE_APPLICATION_CREDENTIALS");
            return service_account_token(http, Path::new(&path)).await;
        }
    }

    if let Some(path) = well_known_credentials_path().filter(|p| p.exists()) {
        tracing::debug!(path = %path.display(), "using gcloud application default credentials");
        return service_account_token(http, &path).await;
    }

    tracing::debug!("trying GCE metadata server");
    metadata_token(http).await.map_err(|e| {
        ProviderError::Auth(format!(
            "could not find default credentials (set GOOGLE_APPLICATION_CREDENTIALS or run `gcloud auth application-default login`): {}",
            e
        ))
    })
}

/// `~/.config/gcloud/application_default_credentials.json`, or the
/// `%APPDATA%` equivalent on Windows.
pub fn well_known_credentials_path() -> Option<PathBuf> {
    let base = if cfg!(windows) {
        dirs::config_dir()
    } else {
        dirs::home_dir().map(|h| h.join(".config"))
    };
    base.map(|b| b.join("gcloud").join("application_default_credentials.json"))
}

async fn metadata_token(http: &reqwest::Client) -> ProviderResult<String> {
    let resp = http
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .timeout(Duration::from_secs(3))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ProviderError::Http {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        });
    }

    let token: TokenResponse = resp.json().await?;
    Ok(token.access_token)
}
