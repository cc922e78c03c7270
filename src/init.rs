//! `tabletalk init`: scaffold a new project folder.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::CONFIG_FILE_NAME;

const CONFIG_TEMPLATE: &str = r#"# Database to introspect
provider:
  type: sqlite                # bigquery | sqlite | postgres | mysql
  database_path: data.db
  # type: postgres
  # host: localhost
  # port: 5432
  # database: analytics
  # user: ${PG_USER}
  # password: ${PG_PASSWORD}
  # type: bigquery
  # project_id: your-gcp-project-id
  # use_default_credentials: true

# Language model used to generate SQL
llm:
  provider: openai            # openai | anthropic
  api_key: ${OPENAI_API_KEY}
  model: gpt-4o
  max_tokens: 500
  temperature: 0

description: ""               # describes the data source in every manifest
contexts: contexts            # folder of context files
output: manifest              # where manifests are written
format: json                  # json | text
"#;

const CONTEXT_TEMPLATE: &str = r#"# A context groups the tables one kind of question needs
name: default_context
description: ""
version: "1.0"
datasets:
  - name: main                # schema or dataset name
    description: ""
    tables:                   # omit to include every table and view
      - your_table
      # - name: another_table
      #   description: Overrides the description stored in the database
"#;

/// Files created by [`init_project`].
#[derive(Debug)]
pub struct Scaffold {
    pub config: PathBuf,
    pub context: PathBuf,
    pub manifest_dir: PathBuf,
}

/// Create `tabletalk.yaml`, `contexts/default_context.yaml` and `manifest/`
/// in `dir`. Refuses to touch a folder that already has a config.
pub fn init_project(dir: &Path) -> Result<Scaffold> {
    let config = dir.join(CONFIG_FILE_NAME);
    if config.exists() {
        bail!("{} already exists", config.display());
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create project folder: {}", dir.display()))?;
    std::fs::write(&config, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", config.display()))?;

    let contexts = dir.join("contexts");
    std::fs::create_dir_all(&contexts)?;
    let context = contexts.join("default_context.yaml");
    if !context.exists() {
        std::fs::write(&context, CONTEXT_TEMPLATE)
            .with_context(|| format!("Failed to write {}", context.display()))?;
    }

    let manifest_dir = dir.join("manifest");
    std::fs::create_dir_all(&manifest_dir)?;

    Ok(Scaffold {
        config,
        context,
        manifest_dir,
    })
}
