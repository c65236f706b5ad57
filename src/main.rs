//! # Context Vault CLI (`cvault`)
//!
//! The `cvault` binary is a thin surface over the result store. It exists
//! for initializing a vault, seeding it with content, and inspecting what
//! agents have stored; the store itself is consumed as a library by
//! orchestrators.
//!
//! ## Usage
//!
//! ```bash
//! cvault --config ./config/vault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cvault init` | Create the SQLite database and schema |
//! | `cvault store <session> <key>` | Store file or inline content under a key |
//! | `cvault get <session> <key>` | Print a stored result with its metadata |
//! | `cvault lines <session> <key> <start> <end>` | Print a line range |
//! | `cvault search <session> <pattern>` | Substring search across a session |
//! | `cvault list <session>` | List stored results, optionally by prefix |
//! | `cvault delete <session> <key>` | Delete one stored result |
//! | `cvault delete-session <session>` | Delete everything in a session |
//! | `cvault sessions` | List known session ids |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use context_vault::config::{self, Config};
use context_vault::models::{ResultKey, StoreOptions};
use context_vault::recent::StoredFileContext;
use context_vault::store::ResultStore;
use context_vault::tools::ToolRegistry;
use context_vault::{ResultBackend, SqliteBackend};

/// Context Vault — a bounded-context content store for LLM agents.
#[derive(Parser)]
#[command(
    name = "cvault",
    about = "Context Vault — a bounded-context content store for LLM agents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing files fall back to
    /// built-in defaults.
    #[arg(long, global = true, default_value = "./config/vault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (sessions, messages, memories, results). Idempotent.
    Init,

    /// Store content under a session and key.
    ///
    /// Reads from `--file`, or from `--content` for inline text.
    /// Identical content already in the store is deduplicated.
    Store {
        /// Session the result belongs to.
        session: String,
        /// Key for the result (typically a path).
        key: String,
        /// Read content from this file.
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// Inline content.
        #[arg(long)]
        content: Option<String>,
    },

    /// Print a stored result with its metadata.
    Get {
        session: String,
        key: String,
    },

    /// Print a line range of a stored result (1-indexed, inclusive).
    Lines {
        session: String,
        key: String,
        start: usize,
        end: usize,
    },

    /// Search a pattern across all stored content in a session.
    Search {
        session: String,
        pattern: String,
        /// Maximum number of matches (defaults to search.default_limit).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List stored results in a session.
    List {
        session: String,
        /// Only keys starting with this prefix.
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Delete one stored result.
    Delete {
        session: String,
        key: String,
    },

    /// Delete every result in a session.
    DeleteSession {
        session: String,
    },

    /// List known session ids, most recently updated first.
    Sessions,
}

async fn open_store(cfg: &Config) -> Result<(Arc<ResultStore>, SqliteBackend)> {
    let backend = SqliteBackend::open(&cfg.db.path).await?;
    let store = ResultStore::open(Arc::new(backend.clone())).await?;
    Ok((Arc::new(store), backend))
}

fn registry_for(store: Arc<ResultStore>, session: &str) -> ToolRegistry {
    ToolRegistry::with_builtins(store, session, Arc::new(StoredFileContext::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let backend = SqliteBackend::open(&cfg.db.path).await?;
            backend.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Store {
            session,
            key,
            file,
            content,
        } => {
            let text = match (file, content) {
                (Some(path), None) => std::fs::read_to_string(&path)?,
                (None, Some(text)) => text,
                (None, None) => bail!("provide either --file or --content"),
                (Some(_), Some(_)) => unreachable!(),
            };

            let (store, _backend) = open_store(&cfg).await?;
            let opts = StoreOptions {
                summary_char_cap: cfg.summary.char_cap,
                summary_line_cap: cfg.summary.line_cap,
                force_store: false,
            };
            let meta = store
                .store(ResultKey::new(session, key), &text, opts)
                .await?;

            println!("stored: {}", meta.key.key);
            println!("  hash:  {}", meta.content_hash);
            println!("  lines: {}", meta.line_count);
            println!("  bytes: {}", meta.byte_size);
            store.close().await;
        }
        Commands::Get { session, key } => {
            let (store, _backend) = open_store(&cfg).await?;
            let result = store.get(&ResultKey::new(session, key)).await?;
            match result {
                Some(result) => {
                    let meta = &result.metadata;
                    println!("--- Result ---");
                    println!("key:          {}", meta.key.key);
                    println!("session:      {}", meta.key.session_id);
                    println!("hash:         {}", meta.content_hash);
                    println!("lines:        {}", meta.line_count);
                    println!("bytes:        {}", meta.byte_size);
                    println!("created_at:   {}", format_ts_iso(meta.created_at));
                    println!("accessed_at:  {}", format_ts_iso(meta.accessed_at));
                    println!("access_count: {}", meta.access_count);
                    println!();
                    println!("--- Content ---");
                    println!("{}", result.content);
                }
                None => {
                    store.close().await;
                    bail!("result not found");
                }
            }
            store.close().await;
        }
        Commands::Lines {
            session,
            key,
            start,
            end,
        } => {
            let (store, _backend) = open_store(&cfg).await?;
            let registry = registry_for(Arc::clone(&store), &session);
            let tool = registry.find("get_lines").expect("built-in tool");
            let out = tool
                .execute(serde_json::json!({ "key": key, "start": start, "end": end }))
                .await?;
            println!("{}", out);
            store.close().await;
        }
        Commands::Search {
            session,
            pattern,
            limit,
        } => {
            let (store, _backend) = open_store(&cfg).await?;
            let registry = registry_for(Arc::clone(&store), &session);
            let tool = registry.find("search_stored").expect("built-in tool");
            let out = tool
                .execute(serde_json::json!({
                    "pattern": pattern,
                    "limit": limit.unwrap_or(cfg.search.default_limit),
                }))
                .await?;
            println!("{}", out);
            store.close().await;
        }
        Commands::List { session, prefix } => {
            let (store, _backend) = open_store(&cfg).await?;
            let registry = registry_for(Arc::clone(&store), &session);
            let tool = registry.find("list_stored").expect("built-in tool");
            let params = match prefix {
                Some(prefix) => serde_json::json!({ "prefix": prefix }),
                None => serde_json::json!({}),
            };
            let out = tool.execute(params).await?;
            println!("{}", out);
            store.close().await;
        }
        Commands::Delete { session, key } => {
            let (store, _backend) = open_store(&cfg).await?;
            store.delete(&ResultKey::new(session, key.clone())).await?;
            println!("deleted: {}", key);
            store.close().await;
        }
        Commands::DeleteSession { session } => {
            let (store, _backend) = open_store(&cfg).await?;
            store.delete_session(&session).await?;
            println!("deleted session: {}", session);
            store.close().await;
        }
        Commands::Sessions => {
            let (store, backend) = open_store(&cfg).await?;
            let sessions = backend.list_sessions().await?;
            if sessions.is_empty() {
                // Result rows don't require a sessions row; fall back to
                // the sessions seen in the results table.
                let mut seen = std::collections::BTreeSet::new();
                for row in backend.load_all_results().await? {
                    seen.insert(row.session_id);
                }
                for session in seen {
                    println!("{}", session);
                }
            } else {
                for session in sessions {
                    println!("{}", session);
                }
            }
            store.close().await;
        }
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
