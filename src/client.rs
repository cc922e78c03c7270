//! Library entry point for asking questions against one manifest.
//!
//! ```rust,no_run
//! # async fn example() -> anyhow::Result<()> {
//! let mut client = tabletalk::load_context(std::path::Path::new("manifest/sales.json"))?;
//! client.set_focus(vec!["orders".to_string()]);
//! let sql = client.generate_sql("Total revenue by month?").await?;
//! let answer = client.ask("How many orders shipped last week?").await?;
//! println!("{}\n{} rows", answer.sql, answer.rows.len());
//! # Ok(())
//! # }
//! ```
//!
//! The manifest must embed an `llm` section. The database connection is
//! opened on the first [`ask`](ContextClient::ask), from the manifest's
//! embedded `provider` section.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::ProviderKind;
use crate::llm::{LlmProvider, SqlPrompt};
use crate::manifest::{compact_schema_json, Manifest};
use crate::models::{CompactTable, Row};
use crate::provider::DatabaseProvider;

/// Generated SQL together with the rows it returned.
#[derive(Debug, Clone)]
pub struct Answer {
    pub sql: String,
    pub rows: Vec<Row>,
}

pub struct ContextClient {
    manifest: Manifest,
    llm: LlmProvider,
    provider: Option<DatabaseProvider>,
    focus: Vec<String>,
}

/// Load a manifest and build its LLM provider.
pub fn load_context(path: &Path) -> Result<ContextClient> {
    let manifest = Manifest::read(path)?;
    let llm_config = manifest
        .llm
        .as_ref()
        .with_context(|| format!("Manifest has no llm configuration: {}", path.display()))?;
    let llm = LlmProvider::from_config(llm_config)?;

    Ok(ContextClient {
        manifest,
        llm,
        provider: None,
        focus: Vec::new(),
    })
}

impl ContextClient {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Restrict prompts to these tables (qualified or bare names).
    pub fn set_focus(&mut self, tables: Vec<String>) {
        self.focus = tables;
    }

    /// Tables sent to the model: the focused ones, or all of them when the
    /// focus list is empty or matches nothing.
    pub fn prompt_tables(&self) -> Vec<&CompactTable> {
        if !self.focus.is_empty() {
            let focused: Vec<&CompactTable> = self
                .manifest
                .tables()
                .filter(|t| self.focus.iter().any(|f| t.matches(f)))
                .collect();
            if !focused.is_empty() {
                return focused;
            }
            tracing::warn!(focus = ?self.focus, "no manifest table matches the focus list, using all tables");
        }
        self.manifest.tables().collect()
    }

    fn kind(&self) -> Option<ProviderKind> {
        self.manifest
            .provider
            .as_ref()
            .map(|p| p.kind())
            .or_else(|| ProviderKind::parse(&self.manifest.data_source.kind))
    }

    pub async fn generate_sql(&self, question: &str) -> Result<String> {
        let schema = compact_schema_json(self.prompt_tables())?;
        let prompt = SqlPrompt {
            kind: self.kind(),
            schema: &schema,
            question,
            focus_tables: &self.focus,
            ..Default::default()
        };
        self.llm.generate_sql(&prompt).await
    }

    /// Run SQL on the manifest's data source, connecting on first use.
    pub async fn execute(&mut self, sql: &str) -> Result<Vec<Row>> {
        if self.provider.is_none() {
            let config = self
                .manifest
                .provider
                .as_ref()
                .context("Manifest has no provider configuration; cannot execute queries")?
                .resolved()?;
            let provider = DatabaseProvider::connect(&config)
                .await
                .with_context(|| format!("Failed to connect to {} provider", config.kind()))?;
            self.provider = Some(provider);
        }

        let provider = self
            .provider
            .as_mut()
            .context("provider connection unavailable")?;
        Ok(provider.execute_query(sql).await?)
    }

    /// Generate SQL for `question` and run it.
    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        let sql = self.generate_sql(question).await?;
        let rows = self.execute(&sql).await?;
        Ok(Answer { sql, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, LlmKind};
    use crate::manifest::DatasetSection;
    use crate::models::CompactField;

    fn write_manifest(dir: &Path, llm: bool) -> std::path::PathBuf {
        let manifest = Manifest {
            name: "shop".to_string(),
            version: "1.0".to_string(),
            llm: llm.then(|| LlmConfig {
                provider: LlmKind::OpenAi,
                api_key: "sk-test".to_string(),
                model: None,
                max_tokens: 100,
                temperature: 0.0,
                base_url: None,
                timeout_secs: 5,
            }),
            datasets: vec![DatasetSection {
                name: "main".to_string(),
                description: String::new(),
                compact_tables: vec![
                    CompactTable::new("users", "", vec![CompactField::new("id", "I")]),
                    CompactTable::new("orders", "", vec![CompactField::new("id", "I")]),
                ],
            }],
            ..Default::default()
        };
        manifest
            .write_to_dir(dir, crate::config::ManifestFormat::Json)
            .unwrap()
    }

    #[test]
    fn test_focus_filters_and_falls_back() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_manifest(tmp.path(), true);
        let mut client = load_context(&path).unwrap();

        assert_eq!(client.prompt_tables().len(), 2);

        client.set_focus(vec!["orders".to_string()]);
        let tables = client.prompt_tables();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].qualified_name, "orders");

        client.set_focus(vec!["missing".to_string()]);
        assert_eq!(client.prompt_tables().len(), 2);
    }

    #[test]
    fn test_manifest_without_llm_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_manifest(tmp.path(), false);
        let err = load_context(&path).err().unwrap();
        assert!(err.to_string().contains("llm"));
    }

    #[tokio::test]
    async fn test_execute_without_provider_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_manifest(tmp.path(), true);
        let mut client = load_context(&path).unwrap();
        let err = client.execute("SELECT 1").await.unwrap_err();
        assert!(err.to_string().contains("provider"));
    }
}
