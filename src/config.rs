//! YAML project configuration.
//!
//! A project is a folder holding `tabletalk.yaml`:
//!
//! ```yaml
//! provider:
//!   type: postgres
//!   host: localhost
//!   database: shop
//!   user: app
//!   password: ${PG_PASSWORD}
//!
//! llm:
//!   provider: openai
//!   api_key: ${OPENAI_API_KEY}
//!   model: gpt-4o
//!   max_tokens: 500
//!   temperature: 0
//!
//! contexts: contexts   # folder of context YAML files, or an inline list
//! output: manifest
//! ```
//!
//! A config may also describe a single context directly with top-level
//! `datasets:` or `schemas:` instead of `contexts:`.
//!
//! Configs are parsed into typed structs up front. `${VAR}` references are
//! kept verbatim here and only resolved by [`crate::env`] right before a
//! provider is built.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::models::{SchemaSelection, TableEntry};

/// File name looked up when a project folder is given instead of a file.
pub const CONFIG_FILE_NAME: &str = "tabletalk.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
    /// Folder of context files, or inline context definitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<ContextsSource>,
    /// Name of the single top-level context (when `contexts` is absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Data source description, written to manifests.
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasets: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<Vec<Value>>,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub format: ManifestFormat,
    #[serde(default = "default_true")]
    pub include_provider: bool,
    #[serde(default = "default_true")]
    pub include_llm: bool,
    /// Directory the config was loaded from; relative paths resolve here.
    #[serde(skip)]
    pub root: PathBuf,
}

fn default_output() -> PathBuf {
    PathBuf::from("manifest")
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Absolute-ish path of the manifest output folder.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.output)
    }

    /// Whether the config describes one context at the top level.
    pub fn is_single_context(&self) -> bool {
        self.contexts.is_none()
    }

    /// The top-level context, when the config has no `contexts` entry.
    pub fn single_context(&self) -> Option<ContextConfig> {
        if !self.is_single_context() {
            return None;
        }
        Some(ContextConfig {
            name: self
                .name
                .clone()
                .unwrap_or_else(|| "default_context".to_string()),
            description: String::new(),
            version: default_version(),
            datasets: self.datasets.clone(),
            schemas: self.schemas.clone(),
        })
    }
}

// ============ Provider config ============

/// Backend tag shared by configs, type maps, and providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    BigQuery,
    Sqlite,
    Postgres,
    Mysql,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::BigQuery,
        ProviderKind::Sqlite,
        ProviderKind::Postgres,
        ProviderKind::Mysql,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::BigQuery => "bigquery",
            ProviderKind::Sqlite => "sqlite",
            ProviderKind::Postgres => "postgres",
            ProviderKind::Mysql => "mysql",
        }
    }

    /// SQL dialect name used in prompts.
    pub fn dialect(&self) -> &'static str {
        match self {
            ProviderKind::BigQuery => "BigQuery",
            ProviderKind::Sqlite => "SQLite",
            ProviderKind::Postgres => "PostgreSQL",
            ProviderKind::Mysql => "MySQL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    BigQuery(BigQueryConfig),
    Sqlite(SqliteConfig),
    Postgres(PostgresConfig),
    Mysql(MysqlConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::BigQuery(_) => ProviderKind::BigQuery,
            ProviderConfig::Sqlite(_) => ProviderKind::Sqlite,
            ProviderConfig::Postgres(_) => ProviderKind::Postgres,
            ProviderConfig::Mysql(_) => ProviderKind::Mysql,
        }
    }

    /// Copy with every `${VAR}` resolved from the environment.
    pub fn resolved(&self) -> Result<Self> {
        crate::env::resolve_config(self).context("Failed to resolve provider configuration")
    }

    /// Make relative file paths absolute against `root`.
    ///
    /// Paths that still hold a `${VAR}` reference are left alone.
    pub fn rebase(&mut self, root: &Path) {
        fn needs_rebase(path: &Path) -> bool {
            path.is_relative()
                && path.as_os_str() != ":memory:"
                && !path.to_string_lossy().contains("${")
        }

        match self {
            ProviderConfig::Sqlite(c) if needs_rebase(&c.database_path) => {
                c.database_path = root.join(&c.database_path);
            }
            ProviderConfig::BigQuery(c) => {
                if let Some(path) = &c.credentials {
                    if needs_rebase(path) {
                        c.credentials = Some(root.join(path));
                    }
                }
            }
            _ => {}
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            ProviderConfig::BigQuery(c) => {
                if c.project_id.trim().is_empty() {
                    bail!("provider.project_id must not be empty");
                }
                if !c.use_default_credentials && c.credentials.is_none() {
                    bail!(
                        "provider.credentials is required unless use_default_credentials is true"
                    );
                }
            }
            ProviderConfig::Sqlite(c) => {
                if c.database_path.as_os_str().is_empty() {
                    bail!("provider.database_path must not be empty");
                }
            }
            ProviderConfig::Postgres(c) => {
                if c.host.trim().is_empty() || c.database.trim().is_empty() {
                    bail!("provider.host and provider.database must not be empty");
                }
            }
            ProviderConfig::Mysql(c) => {
                if c.host.trim().is_empty() || c.database.trim().is_empty() {
                    bail!("provider.host and provider.database must not be empty");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BigQueryConfig {
    pub project_id: String,
    /// Path to a service-account key file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<PathBuf>,
    #[serde(default)]
    pub use_default_credentials: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SqliteConfig {
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortValue>,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MysqlConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortValue>,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// A port written either as a number or as a string (e.g. `${PG_PORT}`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    pub fn resolve(port: Option<&PortValue>, default: u16) -> Result<u16> {
        match port {
            None => Ok(default),
            Some(PortValue::Number(n)) => Ok(*n),
            Some(PortValue::Text(s)) => s
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid port: '{}'", s)),
        }
    }
}

// ============ LLM config ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmKind {
    OpenAi,
    Anthropic,
}

impl LlmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmKind::OpenAi => "openai",
            LlmKind::Anthropic => "anthropic",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmKind::OpenAi => "gpt-4o",
            LlmKind::Anthropic => "claude-3-5-sonnet-20240620",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmKind::OpenAi => "https://api.openai.com",
            LlmKind::Anthropic => "https://api.anthropic.com",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LlmConfig {
    pub provider: LlmKind,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    /// Override the API endpoint (proxies, compatible gateways).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    150
}

fn default_timeout_secs() -> u64 {
    60
}

impl LlmConfig {
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }

    /// Copy with every `${VAR}` resolved from the environment.
    pub fn resolved(&self) -> Result<Self> {
        crate::env::resolve_config(self).context("Failed to resolve llm configuration")
    }

    fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("llm.api_key must not be empty");
        }
        if self.max_tokens == 0 {
            bail!("llm.max_tokens must be > 0");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }
        Ok(())
    }
}

// ============ Contexts ============

/// Where contexts come from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ContextsSource {
    /// A folder (relative to the project) of `*.yaml` context files.
    Folder(PathBuf),
    /// Context definitions written inline.
    Inline(Vec<ContextConfig>),
}

/// One context: a named group of schema selections.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    #[serde(default = "default_context_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version", deserialize_with = "de_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasets: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<Vec<Value>>,
}

fn default_context_name() -> String {
    "unnamed_context".to_string()
}

fn default_version() -> String {
    "1.0".to_string()
}

fn de_version<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Version {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Version::deserialize(deserializer)? {
        Version::Text(s) => s,
        Version::Int(i) => i.to_string(),
        Version::Float(f) => format!("{:?}", f),
    })
}

impl ContextConfig {
    /// Raw selection entries: `datasets` wins over `schemas`.
    ///
    /// `None` when the context declares neither key.
    pub fn raw_selections(&self) -> Option<&[Value]> {
        self.datasets
            .as_deref()
            .or(self.schemas.as_deref())
    }

    /// Parse selection entries, skipping malformed ones with a warning.
    pub fn selections(&self) -> Option<Vec<SchemaSelection>> {
        self.raw_selections()
            .map(|raw| parse_selections(raw, &self.name))
    }

    /// Load a context from a standalone YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read context file: {}", path.display()))?;
        let ctx: ContextConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid format in '{}'", path.display()))?;
        Ok(ctx)
    }
}

/// Interpret raw YAML selection entries.
///
/// Each entry is a bare schema name or a mapping with `name` (or `dataset`), an optional
/// `description`, and an optional `tables` list. Table entries are either a
/// bare name or a `{name, description}` mapping. Anything else is skipped.
pub fn parse_selections(raw: &[Value], context: &str) -> Vec<SchemaSelection> {
    let mut selections = Vec::with_capacity(raw.len());

    for item in raw {
        let name = item
            .as_str()
            .or_else(|| {
                item.get("name")
                    .or_else(|| item.get("dataset"))
                    .and_then(Value::as_str)
            })
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let Some(name) = name else {
            tracing::warn!(context, "missing schema name, skipping entry");
            continue;
        };

        let description = item
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let tables = match item.get("tables") {
            Some(Value::Sequence(entries)) if !entries.is_empty() => {
                Some(parse_table_entries(entries, name))
            }
            None | Some(Value::Null) | Some(Value::Sequence(_)) => None,
            Some(other) => {
                tracing::warn!(
                    context,
                    schema = name,
                    value = ?other,
                    "tables is not a list, using every table"
                );
                None
            }
        };

        selections.push(SchemaSelection {
            name: name.to_string(),
            description,
            tables,
        });
    }

    selections
}

fn parse_table_entries(entries: &[Value], schema: &str) -> Vec<TableEntry> {
    let mut tables = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Value::String(name) if !name.trim().is_empty() => tables.push(TableEntry {
                name: name.trim().to_string(),
                description: None,
            }),
            Value::Mapping(_) => match entry.get("name").and_then(Value::as_str) {
                Some(name) if !name.trim().is_empty() => tables.push(TableEntry {
                    name: name.trim().to_string(),
                    // present-but-null keeps the backend description
                    description: entry
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }),
                _ => tracing::warn!(schema, "table entry without a name, skipping"),
            },
            other => tracing::warn!(schema, entry = ?other, "invalid table entry, skipping"),
        }
    }
    tables
}

// ============ Manifest format ============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    #[default]
    Json,
    Text,
}

impl ManifestFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ManifestFormat::Json => "json",
            ManifestFormat::Text => "txt",
        }
    }

    /// Guess the format from a manifest file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(ManifestFormat::Json),
            Some("txt") => Some(ManifestFormat::Text),
            _ => None,
        }
    }
}

// ============ Loading ============

/// Resolve a project folder or config path to the config file path.
pub fn config_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(CONFIG_FILE_NAME)
    } else {
        path.to_path_buf()
    }
}

/// Load and validate a config from a project folder or a YAML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let file = config_path(path);
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read config file: {}", file.display()))?;

    let mut config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", file.display()))?;

    let root = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    config.root = std::fs::canonicalize(&root).unwrap_or(root);

    Ok(config)
}

/// Parse and validate config text. `root` is left empty.
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: Value = serde_yaml::from_str(content).context("Invalid YAML")?;
    if !raw.is_mapping() {
        bail!("Invalid config format: expected a mapping at the top level");
    }
    if raw.get("provider").is_none() {
        bail!("Missing key 'provider'");
    }
    if raw.get("contexts").is_none()
        && raw.get("datasets").is_none()
        && raw.get("schemas").is_none()
    {
        bail!("Missing key 'contexts' (or top-level 'datasets'/'schemas')");
    }

    let config: Config = serde_yaml::from_value(raw)?;

    config.provider.validate()?;
    if let Some(llm) = &config.llm {
        llm.validate()?;
    }
    if config.output.as_os_str().is_empty() {
        bail!("output must not be empty");
    }

    Ok(config)
}
