//! Project-level query session shared by the REPL and the HTTP server.
//!
//! A session is bound to one project folder: it reads `tabletalk.yaml`, lists
//! the manifests in its output folder, and asks the configured model for SQL
//! against a chosen manifest.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{load_config, Config, ProviderConfig};
use crate::error::ManifestError;
use crate::llm::{LlmProvider, SqlPrompt};
use crate::manifest::{format_schema, list_manifest_files, Manifest};
use crate::models::Row;
use crate::provider::DatabaseProvider;

pub struct QuerySession {
    config: Config,
    llm: LlmProvider,
}

impl QuerySession {
    /// Open a session for a project folder (or a config file path).
    pub fn new(project: &Path) -> Result<Self> {
        let config = load_config(project)?;
        let llm_config = config
            .llm
            .as_ref()
            .context("No llm configuration in tabletalk.yaml")?;
        let llm = LlmProvider::from_config(llm_config)?;
        Ok(Self { config, llm })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.config.output_dir()
    }

    /// Manifest file names in the output folder, sorted.
    pub fn list_manifests(&self) -> Result<Vec<String>> {
        list_manifest_files(&self.manifest_dir())
    }

    /// Load a manifest by file name. Path components are rejected.
    pub fn load_manifest(&self, file: &str) -> Result<Manifest, ManifestError> {
        let name = Path::new(file);
        if file.is_empty()
            || name.components().count() != 1
            || name.file_name().and_then(|n| n.to_str()) != Some(file)
        {
            return Err(ManifestError::InvalidName(file.to_string()));
        }
        let path = self.manifest_dir().join(name);
        if !path.is_file() {
            return Err(ManifestError::NotFound(file.to_string()));
        }
        Manifest::read(&path).map_err(ManifestError::Unreadable)
    }

    pub async fn generate_sql(&self, manifest: &Manifest, question: &str) -> Result<String> {
        let schema = format_schema(manifest);
        let prompt = SqlPrompt {
            kind: Some(self.provider_config(manifest).kind()),
            schema: &schema,
            question,
            ..Default::default()
        };
        self.llm.generate_sql(&prompt).await
    }

    /// Run SQL against the manifest's embedded provider, or the project's.
    ///
    /// A fresh connection is opened and closed for every call.
    pub async fn execute(&self, manifest: &Manifest, sql: &str) -> Result<Vec<Row>> {
        let mut config = self.provider_config(manifest).resolved()?;
        config.rebase(&self.config.root);
        let mut provider = DatabaseProvider::connect(&config)
            .await
            .with_context(|| format!("Failed to connect to {} provider", config.kind()))?;
        let result = provider.execute_query(sql).await;
        provider.close().await;
        Ok(result?)
    }

    fn provider_config<'a>(&'a self, manifest: &'a Manifest) -> &'a ProviderConfig {
        manifest.provider.as_ref().unwrap_or(&self.config.provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(dir: &Path) {
        std::fs::write(
            dir.join("tabletalk.yaml"),
            "provider:\n  type: sqlite\n  database_path: shop.db\nllm:\n  provider: openai\n  api_key: sk-test\ncontexts: contexts\n",
        )
        .unwrap();
    }

    #[test]
    fn test_list_manifests_missing_folder_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        project(tmp.path());
        let session = QuerySession::new(tmp.path()).unwrap();
        assert!(session.list_manifests().unwrap().is_empty());
    }

    #[test]
    fn test_load_manifest_rejects_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        project(tmp.path());
        let session = QuerySession::new(tmp.path()).unwrap();
        for bad in ["../tabletalk.yaml", "a/b.json", ""] {
            let err = session.load_manifest(bad).unwrap_err();
            assert!(matches!(err, ManifestError::InvalidName(_)), "{}", bad);
            assert!(err.to_string().contains("Invalid manifest name"), "{}", bad);
        }
        let err = session.load_manifest("nope.json").unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));
        assert_eq!(err.to_string(), "Manifest not found: nope.json");
    }

    #[test]
    fn test_load_manifest_reports_undecodable_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        project(tmp.path());
        std::fs::create_dir(tmp.path().join("manifest")).unwrap();
        std::fs::write(tmp.path().join("manifest/broken.json"), "{not json").unwrap();
        let session = QuerySession::new(tmp.path()).unwrap();

        let err = session.load_manifest("broken.json").unwrap_err();
        assert!(matches!(err, ManifestError::Unreadable(_)));
        assert!(err.to_string().contains("Invalid manifest"), "{}", err);
    }

    #[test]
    fn test_session_requires_llm() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("tabletalk.yaml"),
            "provider:\n  type: sqlite\n  database_path: shop.db\ncontexts: contexts\n",
        )
        .unwrap();
        let err = QuerySession::new(tmp.path()).err().unwrap();
        assert!(err.to_string().contains("llm"));
    }
}
