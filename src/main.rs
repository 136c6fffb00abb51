//! # Clinical RAG CLI (`clinrag`)
//!
//! The `clinrag` binary builds the clinical-notes index, queries it from the
//! command line, and starts the API and browser UI servers.
//!
//! ## Usage
//!
//! ```bash
//! clinrag --config ./config/clinrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `clinrag generate` | Write a synthetic notes file |
//! | `clinrag build` | Chunk, embed and persist the notes index |
//! | `clinrag stats` | Show index metadata and risk distribution |
//! | `clinrag search "<query>"` | Print ranked chunks without calling the LLM |
//! | `clinrag ask "<question>"` | One-shot answer with sources |
//! | `clinrag serve` | Start the HTTP API |
//! | `clinrag ui` | Start the browser UI |
//! | `clinrag run` | Build, then start the API, then the UI |
//!
//! ## Examples
//!
//! ```bash
//! # Offline demo with the hashing embedder
//! clinrag generate --count 20 --seed 7
//! clinrag build
//! clinrag search "chest pain" --risk high --mode similarity
//!
//! # Full stack (needs GROQ_API_KEY)
//! export GROQ_API_KEY=...
//! clinrag run
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use clinical_rag::models::RiskLevel;
use clinical_rag::search::SearchOptions;
use clinical_rag::{ask, build_cmd, config, launch, search, server, stats, synth, ui};

const DEFAULT_CONFIG: &str = "./config/clinrag.toml";
const DEFAULT_LOG_FILTER: &str = "clinical_rag=info,clinrag=info,tower_http=warn";
const VERBOSE_LOG_FILTER: &str = "clinical_rag=debug,clinrag=debug,tower_http=debug";

/// Clinical RAG: retrieval-augmented question answering over clinical notes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the default path does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "clinrag",
    about = "Retrieval-augmented question answering over synthetic clinical notes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Debug-level logging (ignored when RUST_LOG is set).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a reproducible synthetic notes file.
    Generate {
        /// Number of patients.
        #[arg(long, default_value_t = 12)]
        count: usize,

        /// RNG seed; the same seed always yields the same notes.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output path. Defaults to `[data].notes_path`.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Build the index from the notes file, replacing any existing index.
    Build,

    /// Show index metadata, size, age and risk distribution.
    Stats,

    /// Rank chunks for a query without generating an answer.
    Search {
        query: String,

        /// Number of results. Defaults to `[retrieval].top_k`.
        #[arg(long)]
        k: Option<usize>,

        /// `similarity` or `diverse`.
        #[arg(long)]
        mode: Option<String>,

        /// Relevance weight for diverse mode, in [0, 1].
        #[arg(long)]
        lambda: Option<f32>,

        /// Only chunks tagged with this risk level.
        #[arg(long, value_parser = parse_risk)]
        risk: Option<RiskLevel>,

        /// Only chunks for this patient id.
        #[arg(long)]
        patient: Option<String>,
    },

    /// Answer a question and print its sources.
    Ask { question: String },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Start the browser UI on `[ui].bind`.
    Ui,

    /// Build the index, start the API, then start the UI.
    Run {
        /// Reuse the existing index.
        #[arg(long)]
        skip_build: bool,
    },
}

fn parse_risk(s: &str) -> Result<RiskLevel, String> {
    s.parse::<RiskLevel>().map_err(|e| e.to_string())
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// The default config path is optional; an explicit one must exist.
fn resolve_config(path: &Path) -> anyhow::Result<config::Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(config::Config::minimal());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = resolve_config(&cli.config)?;

    match cli.command {
        Commands::Generate { count, seed, out } => {
            synth::run_generate(&cfg, count, seed, out.as_deref())?;
        }
        Commands::Build => {
            build_cmd::run_build(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Search {
            query,
            k,
            mode,
            lambda,
            risk,
            patient,
        } => {
            let options = SearchOptions {
                k,
                mode,
                lambda,
                risk,
                patient,
            };
            search::run_search(&cfg, &query, &options).await?;
        }
        Commands::Ask { question } => {
            ask::run_ask(&cfg, &question).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ui => {
            ui::run_ui(&cfg).await?;
        }
        Commands::Run { skip_build } => {
            launch::run_all(&cfg, skip_build).await?;
        }
    }

    Ok(())
}
