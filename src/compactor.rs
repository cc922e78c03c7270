//! Schema compaction: turn schema selections into manifest sections.
//!
//! A selection without a table list is discovered in one provider call. A
//! selection with a table list is fetched one table at a time, so a missing
//! or broken table is logged and skipped while its siblings are kept.

use crate::manifest::DatasetSection;
use crate::models::{CompactTable, SchemaSelection, TableEntry};
use crate::provider::DatabaseProvider;

/// Outcome of compacting a list of selections.
#[derive(Debug, Default)]
pub struct Compacted {
    pub sections: Vec<DatasetSection>,
    /// Selections or tables that could not be introspected.
    pub skipped: Vec<String>,
}

impl Compacted {
    pub fn table_count(&self) -> usize {
        self.sections.iter().map(|s| s.compact_tables.len()).sum()
    }
}

/// The description to keep: a YAML override wins over the backend's.
pub fn merge_description(yaml: Option<&str>, reported: &str) -> String {
    match yaml {
        Some(d) => d.to_string(),
        None => reported.to_string(),
    }
}

/// Compact every selection, in order.
pub async fn compact_selections(
    provider: &mut DatabaseProvider,
    selections: &[SchemaSelection],
) -> Compacted {
    let mut out = Compacted::default();

    for selection in selections {
        let tables = match &selection.tables {
            None => compact_schema(provider, &selection.name, &mut out.skipped).await,
            Some(entries) => {
                compact_listed(provider, &selection.name, entries, &mut out.skipped).await
            }
        };

        tracing::info!(
            schema = %selection.name,
            tables = tables.len(),
            "compacted schema"
        );
        out.sections.push(DatasetSection {
            name: selection.name.clone(),
            description: selection.description.clone(),
            compact_tables: tables,
        });
    }

    out
}

async fn compact_schema(
    provider: &mut DatabaseProvider,
    schema: &str,
    skipped: &mut Vec<String>,
) -> Vec<CompactTable> {
    match provider.get_compact_tables(schema, None).await {
        Ok(tables) => tables,
        Err(e) => {
            tracing::warn!(schema, error = %e, "failed to compact schema, skipping");
            skipped.push(schema.to_string());
            Vec::new()
        }
    }
}

async fn compact_listed(
    provider: &mut DatabaseProvider,
    schema: &str,
    entries: &[TableEntry],
    skipped: &mut Vec<String>,
) -> Vec<CompactTable> {
    let mut tables = Vec::with_capacity(entries.len());

    for entry in entries {
        let names = [entry.name.clone()];
        match provider.get_compact_tables(schema, Some(&names)).await {
            Ok(found) => {
                for mut table in found {
                    table.description =
                        merge_description(entry.description.as_deref(), &table.description);
                    tables.push(table);
                }
            }
            Err(e) => {
                tracing::warn!(schema, table = %entry.name, error = %e, "failed to compact table, skipping");
                skipped.push(format!("{}.{}", schema, entry.name));
            }
        }
    }

    tables
}
