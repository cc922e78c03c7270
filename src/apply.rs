//! `tabletalk apply`: compact every context of a project into manifests.
//!
//! # Pipeline
//!
//! ```text
//! tabletalk.yaml ─► resolve ${VAR} ─► connect provider
//!                                          │
//!        contexts (inline | folder | top-level)
//!                                          │
//!              compact selections ─► write <output>/<context>.<ext>
//! ```
//!
//! One provider connection serves every context. A context that cannot be
//! read, or whose manifest cannot be written, is logged and counted as
//! failed; the remaining contexts still run.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::compactor::compact_selections;
use crate::config::{load_config, Config, ContextConfig, ContextsSource, ManifestFormat};
use crate::manifest::{check_manifest_name, DataSource, Manifest};
use crate::provider::DatabaseProvider;

/// Overrides for a single run.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Manifest encoding; falls back to the config's `format`.
    pub format: Option<ManifestFormat>,
    /// Output folder; falls back to the config's `output`.
    pub output: Option<PathBuf>,
}

/// What a run produced.
#[derive(Debug, Clone, Default)]
pub struct ApplySummary {
    /// Contexts that produced a manifest.
    pub contexts: usize,
    /// Tables written across all manifests.
    pub tables: usize,
    pub manifests: Vec<PathBuf>,
    /// Names of contexts that were skipped or failed.
    pub failed: Vec<String>,
}

/// Run with the settings from the config file.
pub async fn apply(path: &Path) -> Result<ApplySummary> {
    apply_with(path, &ApplyOptions::default()).await
}

/// Run with per-invocation overrides.
pub async fn apply_with(path: &Path, options: &ApplyOptions) -> Result<ApplySummary> {
    let config = load_config(path)?;
    let ContextList { contexts, unreadable } = enumerate_contexts(&config)?;
    if contexts.is_empty() {
        if unreadable.is_empty() {
            bail!("No contexts found");
        }
        bail!("No readable contexts found (skipped: {})", unreadable.join(", "));
    }

    let format = options.format.unwrap_or(config.format);
    let output_dir = match &options.output {
        Some(dir) => dir.clone(),
        None => config.output_dir(),
    };

    let mut embedded_provider = config.provider.clone();
    embedded_provider.rebase(&config.root);
    let mut resolved = config.provider.resolved()?;
    resolved.rebase(&config.root);

    let mut provider = DatabaseProvider::connect(&resolved)
        .await
        .with_context(|| format!("Failed to connect to {} provider", resolved.kind()))?;

    let mut summary = ApplySummary {
        failed: unreadable,
        ..Default::default()
    };

    for context in &contexts {
        if let Err(e) = check_manifest_name(&context.name) {
            tracing::warn!(context = %context.name, error = %e, "skipping context");
            summary.failed.push(context.name.clone());
            continue;
        }
        let Some(selections) = context.selections() else {
            tracing::warn!(context = %context.name, "no schemas or datasets defined, skipping");
            summary.failed.push(context.name.clone());
            continue;
        };

        let compacted = compact_selections(&mut provider, &selections).await;

        let manifest = Manifest {
            name: context.name.clone(),
            description: context.description.clone(),
            version: context.version.clone(),
            data_source: DataSource {
                kind: config.provider.kind().to_string(),
                description: config.description.clone(),
            },
            provider: config.include_provider.then(|| embedded_provider.clone()),
            llm: if config.include_llm {
                config.llm.clone()
            } else {
                None
            },
            datasets: compacted.sections,
        };

        match manifest.write_to_dir(&output_dir, format) {
            Ok(path) => {
                tracing::info!(
                    context = %context.name,
                    tables = manifest.table_count(),
                    path = %path.display(),
                    "manifest written"
                );
                summary.contexts += 1;
                summary.tables += manifest.table_count();
                summary.manifests.push(path);
            }
            Err(e) => {
                tracing::warn!(context = %context.name, error = %format!("{:#}", e), "failed to write manifest");
                summary.failed.push(context.name.clone());
            }
        }
    }

    provider.close().await;
    Ok(summary)
}

/// Contexts declared by a config.
#[derive(Debug, Default)]
pub struct ContextList {
    /// In processing order.
    pub contexts: Vec<ContextConfig>,
    /// File stems of context files that could not be read.
    pub unreadable: Vec<String>,
}

/// Contexts declared by a config, in processing order.
///
/// Folder contexts are read from every `*.yaml`/`*.yml` file sorted by file
/// name; unreadable files are logged and reported by stem.
pub fn enumerate_contexts(config: &Config) -> Result<ContextList> {
    match &config.contexts {
        Some(ContextsSource::Inline(list)) => Ok(ContextList {
            contexts: list.clone(),
            ..Default::default()
        }),
        Some(ContextsSource::Folder(dir)) => {
            let dir = config.root.join(dir);
            if !dir.is_dir() {
                bail!("Contexts folder not found: {}", dir.display());
            }
            load_context_folder(&dir)
        }
        None => Ok(ContextList {
            contexts: config.single_context().into_iter().collect(),
            ..Default::default()
        }),
    }
}

fn load_context_folder(dir: &Path) -> Result<ContextList> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read contexts folder: {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();

    let mut list = ContextList::default();
    for file in files {
        match ContextConfig::load(&file) {
            Ok(ctx) => list.contexts.push(ctx),
            Err(e) => {
                tracing::warn!(path = %file.display(), error = %format!("{:#}", e), "skipping context file");
                let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                list.unreadable.push(stem.to_string());
            }
        }
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_enumerate_folder_sorted_and_skips_bad_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let contexts = tmp.path().join("contexts");
        std::fs::create_dir(&contexts).unwrap();
        std::fs::write(contexts.join("b.yaml"), "name: b\nschemas: [main]\n").unwrap();
        std::fs::write(contexts.join("a.yml"), "name: a\nschemas: [main]\n").unwrap();
        std::fs::write(contexts.join("broken.yaml"), "name: [unclosed\n").unwrap();
        std::fs::write(contexts.join("notes.md"), "ignored").unwrap();

        let mut config = parse_config(
            "provider:\n  type: sqlite\n  database_path: db.sqlite\ncontexts: contexts\n",
        )
        .unwrap();
        config.root = tmp.path().to_path_buf();

        let list = enumerate_contexts(&config).unwrap();
        let names: Vec<String> = list.contexts.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(list.unreadable, vec!["broken"]);
    }

    #[test]
    fn test_enumerate_missing_folder_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = parse_config(
            "provider:\n  type: sqlite\n  database_path: db.sqlite\ncontexts: nowhere\n",
        )
        .unwrap();
        config.root = tmp.path().to_path_buf();
        assert!(enumerate_contexts(&config).is_err());
    }

    #[test]
    fn test_enumerate_single_context() {
        let config = parse_config(
            "provider:\n  type: sqlite\n  database_path: db.sqlite\nschemas: [main]\n",
        )
        .unwrap();
        let contexts = enumerate_contexts(&config).unwrap().contexts;
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].name, "default_context");
    }
}
