//! CLI implementation for `pommel` (§4.12).

mod commands;
mod config;
mod display;
mod files;
mod signal;
mod watch;

pub(crate) use config::find_project_root;
pub(crate) use files::acquire_index_lock;
pub(crate) use signal::{check_interrupted, reset_interrupted, setup_signal_handler, ExitCode};

use anyhow::Result;
use clap::{Parser, Subcommand};

use pommel::config::Config;
use pommel::store::StoreError;

#[derive(Parser)]
#[command(name = "pommel")]
#[command(about = "Local-first semantic code search for AI coding agents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show debug info (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or incrementally refresh the project index
    Index {
        /// Wipe the existing index first, re-chunking and re-embedding every file
        #[arg(long)]
        force: bool,
    },
    /// Search the index
    Search {
        /// Natural language description of what you're looking for
        query: String,
        /// Maximum results
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Disable hybrid dense+keyword fusion, use pure vector similarity
        #[arg(long)]
        no_hybrid: bool,
        /// Disable the heuristic re-ranking pass
        #[arg(long)]
        no_rerank: bool,
        /// Restrict to one or more chunk levels (file, class, method)
        #[arg(long = "level")]
        levels: Vec<String>,
        /// Restrict results to files under this path prefix
        #[arg(long)]
        path: Option<String>,
        /// Show only file:line, no code
        #[arg(long)]
        no_content: bool,
        /// Show N lines of context before/after the chunk
        #[arg(short = 'C', long)]
        context: Option<usize>,
    },
    /// Watch the project for changes, keeping the index up to date
    Watch {
        /// Include files normally ignored by .gitignore/hidden-file rules
        #[arg(long)]
        no_ignore: bool,
    },
    /// Start a query server: loopback HTTP API (default) or stdio MCP transport
    Serve {
        /// Port for the loopback HTTP query API (ignored with --mcp)
        #[arg(long)]
        port: Option<u16>,
        /// Serve the stdio MCP transport instead of the HTTP query API
        #[arg(long)]
        mcp: bool,
    },
    /// Show index statistics
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read-only health check: provider, index schema, remote reachability
    Doctor,
}

/// Run the CLI with pre-parsed arguments (main.rs parses first to read `--verbose`).
pub fn run_with(cli: Cli) -> Result<ExitCode> {
    setup_signal_handler();
    reset_interrupted();

    let root = find_project_root();
    let config = Config::load(&root);

    match cli.command {
        Commands::Index { force } => run_fallible(commands::index::run(&root, &config, force)),
        Commands::Search {
            query,
            limit,
            json,
            no_hybrid,
            no_rerank,
            levels,
            path,
            no_content,
            context,
        } => run_fallible(commands::search::run(
            &root,
            &config,
            commands::search::SearchArgs {
                query,
                limit,
                json,
                hybrid: !no_hybrid,
                rerank: !no_rerank,
                levels,
                path_prefix: path,
                no_content,
                context,
            },
        )),
        Commands::Watch { no_ignore } => run_fallible(run_watch(&root, &config, no_ignore)),
        Commands::Serve { port, mcp } => run_fallible(commands::serve::run(&root, &config, port, mcp)),
        Commands::Status { json } => run_fallible(commands::status::run(&root, &config, json)),
        Commands::Doctor => commands::doctor::run(&root, &config),
    }
}

/// Map a plain `anyhow::Result<()>` command outcome onto the process exit-code contract.
fn run_fallible(result: Result<()>) -> Result<ExitCode> {
    match result {
        Ok(()) => Ok(ExitCode::Success),
        Err(e) => {
            eprintln!("error: {e:#}");
            Ok(exit_code_for_error(&e))
        }
    }
}

/// Index schema/model/dimension incompatibilities get their own exit code (§6) so
/// scripts can tell "needs `pommel index --force`" apart from a generic failure.
fn exit_code_for_error(err: &anyhow::Error) -> ExitCode {
    if let Some(e) = err.downcast_ref::<StoreError>() {
        if matches!(
            e,
            StoreError::SchemaMismatch(..)
                | StoreError::SchemaNewerThanSupported(..)
                | StoreError::ModelMismatch(..)
                | StoreError::DimensionMismatch(..)
        ) {
            return ExitCode::SchemaIncompatible;
        }
    }
    ExitCode::Failure
}

fn run_watch(root: &std::path::Path, config: &Config, no_ignore: bool) -> Result<()> {
    use std::sync::Arc;

    let provider = config.build_provider_stack()?;
    let model = pommel::ModelInfo {
        model_name: provider.model_name().to_string(),
        dimensions: provider.dimensions() as u32,
    };
    let store = Arc::new(pommel::Store::open(&config.store.path_or_default(root), Some(&model))?);
    let options = pommel::IndexerOptions::new(provider.context_size());
    let indexer = pommel::Indexer::new(store, provider, options)?;

    let include = config.indexing.include_patterns.clone();
    let exclude = config.indexing.exclude_patterns.clone();
    let debounce = config.watcher.debounce_or_default();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(watch::watch(
        root,
        &indexer,
        include,
        exclude,
        debounce,
        no_ignore,
        check_interrupted,
    ))
}
