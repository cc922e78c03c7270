//! Manifests: persisted snapshots of a compacted context.
//!
//! A manifest is written once per context by `apply` and read back by the
//! query front ends. Two encodings exist.
//!
//! JSON (default), grouping tables by dataset name:
//!
//! ```json
//! {
//!   "name": "sales", "description": "...", "version": "1.0",
//!   "data_source": { "type": "postgres", "description": "..." },
//!   "provider": { "type": "postgres", "host": "...", "password": "${PG_PASSWORD}" },
//!   "llm": { "provider": "openai", "api_key": "${OPENAI_API_KEY}" },
//!   "datasets": [ { "name": "public", "description": "", "tables": ["public.users"] } ],
//!   "compact_tables": [ { "t": "public.users", "d": "", "f": [ { "n": "id", "t": "I" } ] } ]
//! }
//! ```
//!
//! Text, one table per line:
//!
//! ```text
//! DATA_SOURCE: postgres - Production replica
//! CONTEXT: sales - Sales reporting (v1.0)
//! DATASET: public - Core tables
//! TABLES:
//! public.users|Registered users|id:I|name:S
//! ```
//!
//! Text manifests do not carry provider or LLM settings.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{LlmConfig, ManifestFormat, ProviderConfig};
use crate::models::{CompactField, CompactTable};

/// Where the schema came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// Tables compacted from one schema or dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetSection {
    pub name: String,
    pub description: String,
    pub compact_tables: Vec<CompactTable>,
}

/// One context's snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub name: String,
    pub description: String,
    pub version: String,
    pub data_source: DataSource,
    pub provider: Option<ProviderConfig>,
    pub llm: Option<LlmConfig>,
    pub datasets: Vec<DatasetSection>,
}

// ============ JSON layout ============

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    data_source: DataSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    llm: Option<LlmConfig>,
    #[serde(default)]
    datasets: Vec<DatasetEntry>,
    #[serde(default)]
    compact_tables: Vec<CompactTable>,
}

#[derive(Serialize, Deserialize)]
struct DatasetEntry {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tables: Vec<String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Manifest {
    /// Every table, in dataset order.
    pub fn tables(&self) -> impl Iterator<Item = &CompactTable> {
        self.datasets.iter().flat_map(|d| d.compact_tables.iter())
    }

    pub fn table_count(&self) -> usize {
        self.datasets.iter().map(|d| d.compact_tables.len()).sum()
    }

    /// `<name>.json` or `<name>.txt`.
    pub fn file_name(&self, format: ManifestFormat) -> String {
        format!("{}.{}", self.name, format.extension())
    }

    /// Write into `dir`, creating it if needed. Returns the file path.
    pub fn write_to_dir(&self, dir: &Path, format: ManifestFormat) -> Result<PathBuf> {
        check_manifest_name(&self.name)?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output folder: {}", dir.display()))?;
        let path = dir.join(self.file_name(format));
        self.write(&path, format)?;
        Ok(path)
    }

    pub fn write(&self, path: &Path, format: ManifestFormat) -> Result<()> {
        let content = match format {
            ManifestFormat::Json => self.to_json_string()?,
            ManifestFormat::Text => self.to_text(),
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write manifest: {}", path.display()))
    }

    /// Read a manifest, picking the decoder from the file extension.
    pub fn read(path: &Path) -> Result<Self> {
        let format = ManifestFormat::from_path(path).with_context(|| {
            format!(
                "Unknown manifest format (expected .json or .txt): {}",
                path.display()
            )
        })?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        match format {
            ManifestFormat::Json => Self::from_json_str(&content),
            ManifestFormat::Text => Self::from_text(&content),
        }
        .with_context(|| format!("Invalid manifest: {}", path.display()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        let file = ManifestFile {
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            data_source: self.data_source.clone(),
            provider: self.provider.clone(),
            llm: self.llm.clone(),
            datasets: self
                .datasets
                .iter()
                .map(|d| DatasetEntry {
                    name: d.name.clone(),
                    description: d.description.clone(),
                    tables: d
                        .compact_tables
                        .iter()
                        .map(|t| t.qualified_name.clone())
                        .collect(),
                })
                .collect(),
            compact_tables: self.tables().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Parse the JSON layout, regrouping tables under their datasets.
    ///
    /// Tables no dataset lists end up in a trailing section with an empty name.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: ManifestFile = serde_json::from_str(content)?;

        let mut remaining = file.compact_tables;
        let mut datasets = Vec::with_capacity(file.datasets.len() + 1);
        for entry in file.datasets {
            let mut section = DatasetSection {
                name: entry.name,
                description: entry.description,
                compact_tables: Vec::with_capacity(entry.tables.len()),
            };
            for qualified in &entry.tables {
                if let Some(pos) = remaining.iter().position(|t| &t.qualified_name == qualified) {
                    section.compact_tables.push(remaining.remove(pos));
                }
            }
            datasets.push(section);
        }
        if !remaining.is_empty() {
            datasets.push(DatasetSection {
                compact_tables: remaining,
                ..Default::default()
            });
        }

        Ok(Manifest {
            name: file.name,
            description: file.description,
            version: file.version,
            data_source: file.data_source,
            provider: file.provider,
            llm: file.llm,
            datasets,
        })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "DATA_SOURCE: {} - {}\n",
            header_name(&self.data_source.kind),
            sanitize(&self.data_source.description)
        ));
        out.push_str(&format!(
            "CONTEXT: {} - {} (v{})\n",
            header_name(&self.name),
            sanitize(&self.description),
            sanitize(&self.version).replace(['(', ')'], "")
        ));
        for dataset in &self.datasets {
            out.push_str(&format!(
                "DATASET: {} - {}\n",
                header_name(&dataset.name),
                sanitize(&dataset.description)
            ));
            out.push_str("TABLES:\n");
            for table in &dataset.compact_tables {
                out.push_str(&table_line(table));
                out.push('\n');
            }
        }
        out
    }

    /// Parse the text layout. Unrecognized lines are ignored.
    pub fn from_text(content: &str) -> Result<Self> {
        let mut manifest = Manifest {
            version: default_version(),
            ..Default::default()
        };
        let mut seen_context = false;

        for line in content.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim() == "TABLES:" {
                continue;
            }

            if let Some(rest) = line.strip_prefix("DATA_SOURCE:") {
                let (kind, description) = split_dash(rest);
                manifest.data_source = DataSource { kind, description };
            } else if let Some(rest) = line.strip_prefix("CONTEXT:") {
                let (head, version) = split_version(rest);
                let (name, description) = split_dash(head);
                manifest.name = name;
                manifest.description = description;
                if let Some(version) = version {
                    manifest.version = version;
                }
                seen_context = true;
            } else if let Some(rest) = line.strip_prefix("DATASET:") {
                let (name, description) = split_dash(rest);
                manifest.datasets.push(DatasetSection {
                    name,
                    description,
                    compact_tables: Vec::new(),
                });
            } else if line.contains('|') {
                let table = parse_table_line(line);
                if manifest.datasets.is_empty() {
                    manifest.datasets.push(DatasetSection::default());
                }
                if let Some(section) = manifest.datasets.last_mut() {
                    section.compact_tables.push(table);
                }
            } else {
                tracing::debug!(line, "ignoring unrecognized manifest line");
            }
        }

        if !seen_context {
            bail!("missing CONTEXT line");
        }
        Ok(manifest)
    }
}

/// Make a value safe for one pipe-delimited text line.
fn sanitize(s: &str) -> String {
    s.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .replace('|', "/")
}

/// Header names end at the first ` - `, so they must not contain one.
fn header_name(s: &str) -> String {
    let mut s = sanitize(s);
    while s.contains(" - ") {
        s = s.replace(" - ", " / ");
    }
    s.trim().to_string()
}

fn table_line(table: &CompactTable) -> String {
    let mut parts = Vec::with_capacity(table.fields.len() + 2);
    parts.push(sanitize(&table.qualified_name));
    parts.push(sanitize(&table.description));
    for field in &table.fields {
        parts.push(format!("{}:{}", sanitize(&field.name), field.type_code));
    }
    parts.join("|")
}

fn parse_table_line(line: &str) -> CompactTable {
    let mut parts = line.split('|');
    let name = parts.next().unwrap_or_default().trim().to_string();
    let description = parts.next().unwrap_or_default().trim().to_string();
    let fields = parts
        .filter(|p| !p.trim().is_empty())
        .map(|p| match p.rsplit_once(':') {
            Some((n, code)) => CompactField::new(n.trim(), code.trim()),
            None => CompactField::new(p.trim(), crate::type_map::STRING_CODE),
        })
        .collect();
    CompactTable::new(name, description, fields)
}

/// `name - description` → (name, description).
fn split_dash(s: &str) -> (String, String) {
    match s.split_once(" - ") {
        Some((a, b)) => (a.trim().to_string(), b.trim().to_string()),
        None => {
            let s = s.trim();
            let s = s.strip_suffix(" -").unwrap_or(s);
            (s.trim().to_string(), String::new())
        }
    }
}

/// `... (v1.0)` → (`...`, Some("1.0")).
fn split_version(s: &str) -> (&str, Option<String>) {
    let trimmed = s.trim_end();
    if let Some(body) = trimmed.strip_suffix(')') {
        if let Some(idx) = body.rfind(" (v") {
            return (&body[..idx], Some(body[idx + 3..].to_string()));
        }
    }
    (trimmed, None)
}

// ============ Prompt rendering ============

/// Human-readable rendering of a manifest for prompts.
pub fn format_schema(manifest: &Manifest) -> String {
    let mut out = String::new();
    out.push_str(&format!("Data source: {}", manifest.data_source.kind));
    if !manifest.data_source.description.is_empty() {
        out.push_str(&format!(" - {}", manifest.data_source.description));
    }
    out.push('\n');
    out.push_str(&format!("Context: {}", manifest.name));
    if !manifest.description.is_empty() {
        out.push_str(&format!(" - {}", manifest.description));
    }
    out.push('\n');

    for dataset in &manifest.datasets {
        out.push('\n');
        if !dataset.name.is_empty() {
            out.push_str(&format!("Dataset: {}", dataset.name));
            if !dataset.description.is_empty() {
                out.push_str(&format!(" - {}", dataset.description));
            }
            out.push('\n');
        }
        for table in &dataset.compact_tables {
            out.push_str(&format!("Table: {}\n", table.qualified_name));
            if !table.description.is_empty() {
                out.push_str(&format!("Description: {}\n", table.description));
            }
            let fields: Vec<String> = table
                .fields
                .iter()
                .map(|f| format!("{} ({})", f.name, f.type_code))
                .collect();
            out.push_str(&format!("Fields: {}\n", fields.join(", ")));
        }
    }
    out
}

/// Minified JSON array of compact tables.
pub fn compact_schema_json<'a, I>(tables: I) -> Result<String>
where
    I: IntoIterator<Item = &'a CompactTable>,
{
    let tables: Vec<&CompactTable> = tables.into_iter().collect();
    Ok(serde_json::to_string(&tables)?)
}

/// Manifest files (`.json`/`.txt`) in `dir`, sorted by name.
///
/// A missing folder yields an empty list.
/// Context names become file names: no separators, no parent references.
pub fn check_manifest_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        bail!("Invalid context name '{}': must be a plain file name", name);
    }
    Ok(())
}

pub fn list_manifest_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read manifest folder: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && ManifestFormat::from_path(&path).is_some() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
