//! Core data models shared by providers, the compactor, and manifests.
//!
//! Compact records serialize with one-letter keys (`t`, `d`, `f`, `n`) so the
//! JSON handed to the language model stays small.

use serde::{Deserialize, Serialize};

/// One query result row: column name → value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A column reduced to its name and type code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactField {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "t")]
    pub type_code: String,
}

impl CompactField {
    pub fn new(name: impl Into<String>, type_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_code: type_code.into(),
        }
    }
}

/// A table or view reduced to its qualified name, description, and fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactTable {
    #[serde(rename = "t")]
    pub qualified_name: String,
    #[serde(rename = "d", default)]
    pub description: String,
    #[serde(rename = "f", default)]
    pub fields: Vec<CompactField>,
}

impl CompactTable {
    /// Build a table, dropping any field with an empty name.
    pub fn new(
        qualified_name: impl Into<String>,
        description: impl Into<String>,
        fields: Vec<CompactField>,
    ) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            description: description.into(),
            fields: fields
                .into_iter()
                .filter(|f| !f.name.trim().is_empty())
                .collect(),
        }
    }

    /// The unqualified table name (text after the last `.`).
    pub fn table_name(&self) -> &str {
        self.qualified_name
            .rsplit_once('.')
            .map(|(_, t)| t)
            .unwrap_or(&self.qualified_name)
    }

    /// Whether `name` refers to this table, qualified or not.
    pub fn matches(&self, name: &str) -> bool {
        self.qualified_name == name || self.table_name() == name
    }
}

/// Join a schema and table into the name a backend reports.
pub fn qualify(schema: &str, table: &str, multi_schema: bool) -> String {
    if multi_schema && !schema.is_empty() {
        format!("{}.{}", schema, table)
    } else {
        table.to_string()
    }
}

/// A table listed in a context file, with an optional description override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub name: String,
    pub description: Option<String>,
}

/// A schema/dataset to compact, plus an optional explicit table list.
///
/// `tables == None` means every table and view in the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSelection {
    pub name: String,
    pub description: String,
    pub tables: Option<Vec<TableEntry>>,
}

impl SchemaSelection {
    /// Select every table in `name`.
    pub fn all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tables: None,
        }
    }
}
