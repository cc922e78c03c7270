//! # tabletalk
//!
//! Compact database schemas into token-efficient manifests and ask a language
//! model for SQL against them.
//!
//! tabletalk introspects tables and views from BigQuery, PostgreSQL, MySQL,
//! and SQLite, reduces every column to a name and a one- or two-letter type
//! code, and writes one manifest per context. Manifests are then handed to
//! OpenAI or Anthropic models together with a question to produce SQL, which
//! can optionally be executed against the same database.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌─────────────┐   ┌────────────┐
//! │ tabletalk.yaml│──▶│  Providers  │──▶│ Compactor  │
//! │  + contexts/  │   │ BQ/PG/My/SL │   │ t / d / f  │
//! └───────────────┘   └─────────────┘   └─────┬──────┘
//!                                             ▼
//!                                       ┌────────────┐
//!                                       │ manifest/  │
//!                                       │ .json .txt │
//!                                       └─────┬──────┘
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                ┌──────────┐          ┌────────────┐
//!                │ CLI REPL │          │ HTTP server│
//!                └────┬─────┘          └─────┬──────┘
//!                     └─────────┬────────────┘
//!                               ▼
//!                        ┌────────────┐
//!                        │    LLM     │
//!                        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tabletalk init                 # scaffold tabletalk.yaml and contexts/
//! tabletalk apply                # write manifests
//! tabletalk query                # ask questions interactively
//! tabletalk serve                # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | YAML configuration parsing |
//! | [`env`] | `${VAR}` resolution |
//! | [`models`] | Compact tables, fields, selections |
//! | [`type_map`] | Native type → code tables |
//! | [`provider`] | Database providers |
//! | [`error`] | Provider error type |
//! | [`compactor`] | Selections → compact tables |
//! | [`manifest`] | Manifest encodings |
//! | [`apply`] | Config → manifests |
//! | [`llm`] | Language model providers |
//! | [`client`] | Question answering over one manifest |
//! | [`session`] | Project query session |
//! | [`server`] | HTTP server |
//! | [`init`] | Project scaffolding |
//! | [`logging`] | Tracing setup |

pub mod apply;
pub mod client;
pub mod compactor;
pub mod config;
pub mod env;
pub mod error;
pub mod init;
pub mod llm;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod provider;
pub mod server;
pub mod session;
pub mod type_map;

pub use apply::{apply, apply_with, ApplyOptions, ApplySummary};
pub use client::{load_context, Answer, ContextClient};
pub use error::{ManifestError, ProviderError, ProviderResult};
pub use llm::LlmProvider;
pub use provider::DatabaseProvider;
