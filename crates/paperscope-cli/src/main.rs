use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use paperscope_core::{AppConfig, FulltextShard, MirrorIndex, PaperRecord, SearchOptions, SearchRequest};
use paperscope_search::{SHARD_KINDS, pipeline_from_config};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "paperscope",
    about = "Federated academic literature search",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format.
    /// Also enabled by setting PAPERSCOPE_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging, including per-source timings.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every configured source and print the ranked list.
    Search {
        query: String,
        /// Requested page size; anything above 5 returns 20, otherwise 10.
        #[arg(long)]
        limit: Option<usize>,
        /// Only open-access works from the bibliographic API.
        #[arg(long)]
        oa: bool,
        /// Skip the generated summary.
        #[arg(long)]
        no_summary: bool,
    },

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check the local indexes.
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config as TOML.
    Show,
    /// Print the config file path.
    Path,
    /// Write the default config if none exists.
    Init,
}

// ─── Main ────────────────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let default_level = if verbose { "paperscope=debug" } else { "paperscope=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let json_output = cli.json || std::env::var("PAPERSCOPE_JSON").as_deref() == Ok("1");
    let config = AppConfig::load().context("loading config")?;

    match cli.command {
        // ── Search ─────────────────────────────────────────────────────────
        Commands::Search {
            query,
            limit,
            oa,
            no_summary,
        } => {
            let options = SearchOptions {
                open_access_only: oa,
                summarize: !no_summary,
            };
            let request = SearchRequest::new(Some(&query), limit, options)?;
            let pipeline = pipeline_from_config(&config)?;
            let response = pipeline.search(&request).await;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": response,
                    "meta": {"duration_ms": dur}
                }))?;
            } else {
                if !response.summary.sum.is_empty() {
                    println!("{}\n", response.summary.sum);
                }
                for (i, record) in response.results.iter().enumerate() {
                    print_record(i + 1, record);
                }
                if response.results.is_empty() {
                    println!("No results.");
                }
            }
        }

        // ── Config ─────────────────────────────────────────────────────────
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                if json_output {
                    print_json(&serde_json::json!({"status": "ok", "data": config}))?;
                } else {
                    println!("{}", toml::to_string_pretty(&config)?);
                }
            }
            ConfigAction::Path => {
                println!("{}", AppConfig::config_path().display());
            }
            ConfigAction::Init => {
                let path = AppConfig::config_path();
                if path.exists() {
                    println!("Config already exists: {}", path.display());
                } else {
                    AppConfig::default().save_to(&path)?;
                    println!("Wrote default config: {}", path.display());
                }
            }
        },

        // ── Doctor ─────────────────────────────────────────────────────────
        Commands::Doctor => {
            let config_path = AppConfig::config_path();
            if config_path.exists() {
                println!("✓ Config: {}", config_path.display());
            } else {
                println!("○ Config: not found (using defaults)");
            }

            let mut issues = 0;
            for ((name, shard), (_, layout)) in config.fulltext_shards().into_iter().zip(SHARD_KINDS) {
                if !shard.enabled {
                    println!("○ {name}: disabled");
                    continue;
                }
                let checked = FulltextShard::open(name, Path::new(&shard.path), layout)
                    .and_then(|s| s.validate_schema());
                match checked {
                    Ok(()) => println!("✓ {name}: {}", shard.path),
                    Err(e) => {
                        issues += 1;
                        println!("✗ {name}: {e}");
                    }
                }
            }

            let mirror_path = &config.sources.mirror_index_path;
            match MirrorIndex::open(Path::new(mirror_path)).and_then(|m| m.len()) {
                Ok(count) => println!("✓ Mirror index: {mirror_path} ({count} DOIs)"),
                Err(e) => {
                    issues += 1;
                    println!("✗ Mirror index: {e}");
                }
            }

            if issues == 0 {
                println!("\nAll checks passed ✓");
            } else {
                println!("\n{issues} issues found");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn print_record(position: usize, record: &PaperRecord) {
    let tag = record.similarity_tag.map(|t| t.as_str()).unwrap_or("-");
    println!("{position:>2}. {} [{tag}]", record.title_str());
    println!("    {} ({})", record.authors_display(), record.location);
    println!("    {} · {}", record.doi.as_deref().unwrap_or_default(), record.source);
    if !record.url.is_empty() {
        println!("    {}", record.url);
    }
}
