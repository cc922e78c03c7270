//! # tabletalk CLI
//!
//! The `tabletalk` binary scaffolds projects, writes manifests, and asks a
//! language model for SQL against them.
//!
//! ## Usage
//!
//! ```bash
//! tabletalk [--verbose] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tabletalk init [folder]` | Create `tabletalk.yaml`, `contexts/`, and `manifest/` |
//! | `tabletalk apply [project]` | Introspect the database and write one manifest per context |
//! | `tabletalk query [project]` | Ask questions against a manifest interactively |
//! | `tabletalk serve [project]` | Start the HTTP server |
//! | `tabletalk completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Scaffold a project in ./analytics
//! tabletalk init analytics
//!
//! # Write text manifests instead of the configured format
//! tabletalk apply analytics --format text
//!
//! # Ask about one manifest and run the generated SQL
//! tabletalk query analytics --manifest sales.json --execute
//!
//! # Serve the project on all interfaces
//! tabletalk serve analytics --bind 0.0.0.0:5000
//! ```

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use tabletalk::config::ManifestFormat;
use tabletalk::manifest::Manifest;
use tabletalk::session::QuerySession;
use tabletalk::{apply_with, ApplyOptions};

/// Talk to your tables: compact schemas into manifests and generate SQL.
#[derive(Parser)]
#[command(name = "tabletalk", version, about)]
struct Cli {
    /// Log debug diagnostics to stderr (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new project.
    ///
    /// Creates `tabletalk.yaml`, `contexts/default_context.yaml` and an empty
    /// `manifest/` folder. Fails if `tabletalk.yaml` already exists.
    Init {
        /// Project folder (created if missing).
        #[arg(default_value = ".")]
        folder: PathBuf,
    },
    /// Write manifests for every context in a project.
    ///
    /// Connects to the configured database once, compacts each context's
    /// tables, and writes one manifest per context to the output folder.
    Apply {
        /// Project folder or path to a config file.
        #[arg(default_value = ".")]
        project: PathBuf,
        /// Manifest format, overriding `format:` in the config.
        #[arg(long, value_enum)]
        format: Option<ManifestFormat>,
        /// Output folder, overriding `output:` in the config.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Ask questions against a manifest.
    ///
    /// Reads questions from an interactive prompt (or from stdin when it is
    /// not a terminal) and prints the generated SQL. Type `exit` to quit.
    Query {
        /// Project folder or path to a config file.
        #[arg(default_value = ".")]
        project: PathBuf,
        /// Manifest file to use (prompted for when several exist).
        #[arg(long, short)]
        manifest: Option<String>,
        /// Run each generated query and print the rows.
        #[arg(long)]
        execute: bool,
    },
    /// Start the HTTP server.
    Serve {
        /// Project folder or path to a config file.
        #[arg(default_value = ".")]
        project: PathBuf,
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:5000")]
        bind: String,
    },
    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tabletalk::logging::init_logging(cli.verbose);

    match cli.command {
        Commands::Init { folder } => {
            let scaffold = tabletalk::init::init_project(&folder)?;
            println!("Created {}", scaffold.config.display());
            println!("Created {}", scaffold.context.display());
            println!("Created {}/", scaffold.manifest_dir.display());
            println!();
            println!("Edit the config and contexts, then run `tabletalk apply`.");
        }
        Commands::Apply {
            project,
            format,
            output,
        } => {
            let options = ApplyOptions { format, output };
            let summary = apply_with(&project, &options).await?;
            for path in &summary.manifests {
                println!("  wrote {}", path.display());
            }
            println!(
                "Applied {} context(s), {} table(s).",
                summary.contexts, summary.tables
            );
            if !summary.failed.is_empty() {
                println!("Skipped: {}", summary.failed.join(", "));
            }
        }
        Commands::Query {
            project,
            manifest,
            execute,
        } => {
            run_query(&project, manifest.as_deref(), execute).await?;
        }
        Commands::Serve { project, bind } => {
            tabletalk::server::run_server(&project, &bind).await?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "tabletalk", &mut std::io::stdout());
        }
    }

    Ok(())
}

// ============ query ============

/// Where query-mode input lines come from: a line editor on a terminal,
/// plain stdin lines otherwise.
enum Input {
    Editor(rustyline::DefaultEditor, Option<PathBuf>),
    Lines(std::io::Lines<std::io::StdinLock<'static>>),
}

impl Input {
    fn open() -> Result<Self> {
        if !atty::is(atty::Stream::Stdin) {
            return Ok(Self::Lines(std::io::stdin().lock().lines()));
        }
        let mut rl = rustyline::DefaultEditor::new()?;
        let history = dirs::home_dir().map(|p| p.join(".tabletalk_history"));
        if let Some(path) = &history {
            let _ = rl.load_history(path);
        }
        Ok(Self::Editor(rl, history))
    }

    /// Next trimmed line, or `None` at end of input.
    fn read(&mut self, prompt: &str) -> Result<Option<String>> {
        use rustyline::error::ReadlineError;

        match self {
            Self::Editor(rl, _) => loop {
                match rl.readline(prompt) {
                    Ok(line) => {
                        let line = line.trim().to_string();
                        if !line.is_empty() {
                            let _ = rl.add_history_entry(line.as_str());
                        }
                        return Ok(Some(line));
                    }
                    Err(ReadlineError::Interrupted) => continue,
                    Err(ReadlineError::Eof) => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
            },
            Self::Lines(lines) => {
                print!("{}", prompt);
                std::io::stdout().flush()?;
                match lines.next() {
                    Some(line) => Ok(Some(line?.trim().to_string())),
                    None => Ok(None),
                }
            }
        }
    }

    fn save_history(&mut self) {
        if let Self::Editor(rl, Some(path)) = self {
            let _ = rl.save_history(path);
        }
    }
}

/// Parse a 1-based manifest number.
fn parse_selection(input: &str, count: usize) -> Option<usize> {
    match input.trim().parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(n - 1),
        _ => None,
    }
}

/// Ask for a manifest by number until a valid one is given.
fn select_manifest(input: &mut Input, manifests: &[String]) -> Result<String> {
    if let [only] = manifests {
        return Ok(only.clone());
    }
    println!("Available manifests:");
    for (i, name) in manifests.iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
    loop {
        let Some(line) = input.read("Select a manifest file by number: ")? else {
            bail!("No manifest selected");
        };
        match parse_selection(&line, manifests.len()) {
            Some(i) => return Ok(manifests[i].clone()),
            None => println!("Invalid selection '{}'; enter 1-{}.", line, manifests.len()),
        }
    }
}

async fn run_query(project: &Path, requested: Option<&str>, execute: bool) -> Result<()> {
    let session = QuerySession::new(project)?;
    let manifests = session.list_manifests()?;
    if manifests.is_empty() {
        bail!(
            "No manifests in {}; run `tabletalk apply` first",
            session.manifest_dir().display()
        );
    }

    let mut input = Input::open()?;
    let name = match requested {
        Some(name) => name.to_string(),
        None => select_manifest(&mut input, &manifests)?,
    };
    let manifest = session.load_manifest(&name)?;
    println!(
        "Using {} ({} tables). Type `exit` to quit.",
        name,
        manifest.table_count()
    );

    while let Some(line) = input.read("question> ")? {
        if !answer(&session, &manifest, &line, execute).await {
            break;
        }
    }
    input.save_history();
    Ok(())
}

/// Handle one input line. Returns `false` when the loop should stop.
async fn answer(session: &QuerySession, manifest: &Manifest, question: &str, execute: bool) -> bool {
    match question {
        "" => return true,
        "exit" | "quit" => return false,
        _ => {}
    }

    let sql = match session.generate_sql(manifest, question).await {
        Ok(sql) => sql,
        Err(e) => {
            println!("Error generating SQL: {:#}", e);
            return true;
        }
    };
    println!("\n{}\n", sql);

    if execute {
        match session.execute(manifest, &sql).await {
            Ok(rows) => {
                for row in &rows {
                    println!("{}", serde_json::Value::Object(row.clone()));
                }
                println!("({} rows)\n", rows.len());
            }
            Err(e) => println!("Error executing SQL: {:#}", e),
        }
    }
    true
}
