//! # Spiral CLI (`spiral`)
//!
//! Command-line interface to the Spiral context-memory engine: storing
//! context nodes, querying tiered payloads, running maintenance passes,
//! and moving archives in and out of the store.
//!
//! ## Usage
//!
//! ```bash
//! spiral --config ./spiral.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `spiral init` | Create the SQLite database and run schema migrations |
//! | `spiral store "<content>"` | Store a context node |
//! | `spiral query "<text>"` | Assemble a tiered context payload |
//! | `spiral status` | Node/edge/tier counts, embedding state, db size |
//! | `spiral evolve` | Reclassify tiers from current relevance scores |
//! | `spiral compact` | Age-gated lossy compaction |
//! | `spiral relate <src> <dst>` | Create an edge between two nodes |
//! | `spiral export <path>` | Write the store as an archive bundle |
//! | `spiral import <path>` | Merge (or replace from) an archive bundle |
//! | `spiral viz` | Emit a graph snapshot for visualization tools |
//! | `spiral save-state` | Archive recent conversation turns, then evolve |
//! | `spiral clear` | Delete all nodes, edges, and vectors |
//!
//! ## Examples
//!
//! ```bash
//! spiral init
//!
//! spiral store "switched the queue to a ring buffer" --kind decision \
//!     --meta project=ingest
//!
//! spiral query "why did the queue change?" --max-tokens 1500
//!
//! spiral evolve --decay
//! spiral compact --aggressive
//!
//! spiral export ./backup.json
//! spiral import ./backup.json --replace
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use spiral::archive_io;
use spiral::config::{self, Config};
use spiral::engine::SpiralEngine;

/// Spiral CLI — a tiered context-memory engine with relevance-driven
/// evolution and token-budget context assembly.
#[derive(Parser)]
#[command(
    name = "spiral",
    about = "Spiral — a tiered context-memory engine",
    version,
    long_about = "Spiral stores context as a graph of typed nodes across five memory tiers, \
    evolves their placement from relevance and recency, and assembles token-bounded, \
    tier-ordered context payloads for queries."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, built-in defaults are used with the
    /// database at `./spiral.db`.
    #[arg(long, global = true, default_value = "./spiral.toml")]
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
    /// (nodes, edges, node_vectors, schema_meta). Idempotent.
    Init,

    /// Store a context node.
    ///
    /// Creates a tier-1 node at full relevance, embeds it when an
    /// embedding provider is configured, links any explicit relations,
    /// and auto-relates it to its nearest existing neighbors.
    Store {
        /// The node's full text content.
        content: String,

        /// Type tag: `code`, `error`, `decision`, `architecture`,
        /// `pattern`, `conversation`, or any custom tag.
        #[arg(long, default_value = "note")]
        kind: String,

        /// Metadata entries as `key=value` pairs.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,

        /// Explicit relations as `<target-node-id>=<relation>` pairs.
        /// Targets must already exist.
        #[arg(long = "relate", value_parser = parse_key_val)]
        relations: Vec<(String, String)>,
    },

    /// Assemble a tiered context payload for a query.
    Query {
        /// The query text.
        query: String,

        /// Token budget for the whole payload. Defaults to
        /// `assembly.default_max_tokens` from config.
        #[arg(long)]
        max_tokens: Option<i64>,

        /// Restrict assembly to these tiers (1..5); repeatable.
        /// Budget reserved for omitted tiers rolls over.
        #[arg(long = "level")]
        levels: Vec<i64>,
    },

    /// Report store statistics.
    ///
    /// Prints node/edge counts, per-tier node counts, the embedding
    /// provider state, and on-disk database size.
    Status,

    /// Run the tier-evolution pass.
    ///
    /// Lossless: reclassifies every node's tier from its current
    /// relevance score. With `--decay`, erodes scores by idle time first.
    Evolve {
        /// Apply time-based relevance decay before reclassifying.
        #[arg(long)]
        decay: bool,
    },

    /// Run the compaction pass.
    ///
    /// Summarizes and demotes idle nodes past per-tier age gates. Only
    /// with `--aggressive` are the gates on tiers 2-3 waived and
    /// deep-archive nodes idle past 30 days deleted. This is the only
    /// command that deletes individual nodes.
    Compact {
        /// Waive the tier-2/3 idle gates and allow tier-4 demotion and
        /// tier-5 deletion.
        #[arg(long)]
        aggressive: bool,
    },

    /// Create an edge between two existing nodes.
    Relate {
        /// Source node id.
        source: String,
        /// Target node id.
        target: String,
        /// Relation tag.
        #[arg(long, default_value = "related")]
        relation: String,
        /// Edge weight.
        #[arg(long, default_value_t = 1.0)]
        weight: f64,
    },

    /// Export the store as an archive bundle (JSON).
    Export {
        /// Output file path.
        path: PathBuf,
    },

    /// Import an archive bundle.
    ///
    /// The bundle is checksum-validated before anything is written.
    /// Merge mode (default) skips content-hash duplicates; `--replace`
    /// wipes the store first.
    Import {
        /// Archive file path.
        path: PathBuf,

        /// Clear all existing data before importing.
        #[arg(long)]
        replace: bool,
    },

    /// Emit a graph snapshot for visualization tools.
    Viz {
        /// Output file; prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Archive recent conversation turns as tier-1 nodes, then evolve.
    ///
    /// Intended as a shutdown hook: only the newest ten messages are
    /// kept.
    SaveState {
        /// Conversation turns as `role=content` pairs, oldest first.
        #[arg(long = "message", value_parser = parse_key_val)]
        messages: Vec<(String, String)>,
    },

    /// Delete all nodes, edges, and vectors.
    Clear {
        /// Skip the safety check.
        #[arg(long)]
        force: bool,
    },
}

/// Parse a `key=value` pair for `--meta` / `--relate` / `--message` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spiral=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::minimal()
    };

    match cli.command {
        Commands::Init => {
            let engine = SpiralEngine::open(cfg).await?;
            engine.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Store {
            content,
            kind,
            meta,
            relations,
        } => {
            let engine = SpiralEngine::open(cfg).await?;
            let metadata = serde_json::Value::Object(
                meta.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect(),
            );
            let outcome = engine.store(&content, &kind, metadata, &relations).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            engine.close().await;
        }
        Commands::Query {
            query,
            max_tokens,
            levels,
        } => {
            let engine = SpiralEngine::open(cfg).await?;
            let levels = if levels.is_empty() { None } else { Some(levels) };
            let payload = engine.query(&query, max_tokens, levels).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
            engine.close().await;
        }
        Commands::Status => {
            let engine = SpiralEngine::open(cfg).await?;
            let status = engine.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            engine.close().await;
        }
        Commands::Evolve { decay } => {
            let engine = SpiralEngine::open(cfg).await?;
            if decay {
                let report = engine.decay().await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let report = engine.evolve().await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            engine.close().await;
        }
        Commands::Compact { aggressive } => {
            let engine = SpiralEngine::open(cfg).await?;
            let report = engine.compact(aggressive).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            engine.close().await;
        }
        Commands::Relate {
            source,
            target,
            relation,
            weight,
        } => {
            let engine = SpiralEngine::open(cfg).await?;
            let created = engine.relate(&source, &target, &relation, weight).await?;
            if created {
                println!("Edge created.");
            } else {
                println!("Edge already exists.");
            }
            engine.close().await;
        }
        Commands::Export { path } => {
            let engine = SpiralEngine::open(cfg).await?;
            let bundle = engine.export_archive().await?;
            archive_io::write_archive(&path, &bundle)?;
            println!(
                "Exported {} nodes and {} edges to {}.",
                bundle.manifest.node_count,
                bundle.manifest.edge_count,
                path.display()
            );
            engine.close().await;
        }
        Commands::Import { path, replace } => {
            let engine = SpiralEngine::open(cfg).await?;
            let bundle = archive_io::read_archive(&path)?;
            let report = engine.import_archive(&bundle, replace).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            engine.close().await;
        }
        Commands::Viz { output } => {
            let engine = SpiralEngine::open(cfg).await?;
            let graph = engine.export_for_visualization().await?;
            let json = serde_json::to_string_pretty(&graph)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Graph written to {}.", path.display());
                }
                None => println!("{json}"),
            }
            engine.close().await;
        }
        Commands::SaveState { messages } => {
            let engine = SpiralEngine::open(cfg).await?;
            let stored = engine.save_state(&messages).await?;
            println!("Archived {stored} conversation turns.");
            engine.close().await;
        }
        Commands::Clear { force } => {
            if !force {
                anyhow::bail!("clear deletes all data; re-run with --force to confirm");
            }
            let engine = SpiralEngine::open(cfg).await?;
            engine.clear_all().await?;
            println!("Store cleared.");
            engine.close().await;
        }
    }

    Ok(())
}
