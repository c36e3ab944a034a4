use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use sieve::batch::{self, ItemResult};
use sieve::config::Config;
use sieve::output::{self, terminal};
use sieve::providers::download;
use sieve::{ModerationEngine, ModerationMode, ModerationRequest};

/// Sieve: moderate text across several classifiers at once.
///
/// Queries a hosted moderation API, an LLM classification prompt, and a
/// local toxicity model, then merges their verdicts into one.
#[derive(Parser)]
#[command(name = "sieve", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Moderate a single piece of text
    Moderate {
        /// The text to moderate
        text: String,

        /// openai, anthropic, detoxify, or combined
        #[arg(long, default_value = "combined")]
        mode: ModerationMode,

        /// Include each provider's native response
        #[arg(long)]
        raw: bool,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Moderate one text per line from a file (or stdin with `-`)
    Batch {
        /// Input file; reads stdin when omitted or `-`
        file: Option<PathBuf>,

        /// openai, anthropic, detoxify, or combined
        #[arg(long, default_value = "combined")]
        mode: ModerationMode,

        /// Items to moderate in parallel (default: SIEVE_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print one JSON object per line instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show which providers are configured
    Providers,

    /// Download the ONNX toxicity model (~126 MB)
    DownloadModel,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Logs go to stderr so `--json` output stays clean on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sieve=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Moderate {
            text,
            mode,
            raw,
            json,
        } => {
            let config = Config::load()?;
            let engine = ModerationEngine::from_config(&config)?;

            let request = ModerationRequest::text(text)
                .with_mode(mode)
                .with_raw_response(raw);

            match engine.moderate(&request).await {
                Ok(result) if json => println!("{}", output::result_json(&result)?),
                Ok(result) => terminal::display_verdict(&result),
                Err(e) => {
                    if !json {
                        terminal::display_failure(&e);
                    }
                    return Err(e).context("Moderation failed");
                }
            }
        }

        Commands::Batch {
            file,
            mode,
            concurrency,
            json,
        } => {
            let config = Config::load()?;
            let engine = ModerationEngine::from_config(&config)?;
            let concurrency = concurrency.unwrap_or(engine.concurrency()).max(1);

            let lines = read_lines(file.as_deref())?;
            if lines.is_empty() {
                println!("Nothing to moderate.");
                return Ok(());
            }

            info!(items = lines.len(), concurrency, %mode, "Starting batch");

            let requests: Vec<ModerationRequest> = lines
                .iter()
                .map(|line| ModerationRequest::text(line.as_str()).with_mode(mode))
                .collect();

            let pb = if json {
                ProgressBar::hidden()
            } else {
                let pb = ProgressBar::new(lines.len() as u64);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("  Moderating [{bar:30}] {pos}/{len} ({eta})")
                        .context("Invalid progress bar template")?,
                );
                pb
            };

            let results: Vec<ItemResult> = batch::moderate_stream(&engine, requests, concurrency)
                .inspect(|_| pb.inc(1))
                .collect()
                .await;
            pb.finish_and_clear();

            if json {
                for (index, item) in results.iter().enumerate() {
                    println!("{}", output::item_json(index, item)?);
                }
            } else {
                terminal::display_batch(&lines, &results);
            }
        }

        Commands::Providers => {
            let config = Config::load()?;
            let engine = ModerationEngine::from_config(&config)?;
            terminal::display_providers(&engine);

            if engine.configured_providers().is_empty() {
                println!(
                    "\n{}",
                    "Set OPENAI_API_KEY or ANTHROPIC_API_KEY, or run `sieve download-model`."
                        .dimmed()
                );
            }
        }

        Commands::DownloadModel => {
            let config = Config::load()?;
            let model_dir = &config.detoxify.model_dir;

            println!("Downloading ONNX toxicity model...");
            println!("  Destination: {}", model_dir.display());

            download::download_model(model_dir).await?;

            println!("\n{}", "Model downloaded successfully.".bold());
            println!("You can now run `sieve moderate --mode detoxify \"some text\"`.");
        }
    }

    Ok(())
}

/// Non-blank lines from a file, or from stdin when the path is absent or `-`.
fn read_lines(path: Option<&std::path::Path>) -> Result<Vec<String>> {
    let contents = match path {
        Some(p) if p.as_os_str() != "-" => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read {}", p.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}
