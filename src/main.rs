//! Thin CLI over the scrape pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pingrab::{ScrapeConfig, Scraper};

#[derive(Debug, Parser)]
#[command(name = "pingrab", about = "Extract media from a Pinterest-style board", version)]
struct Cli {
    /// Board URL, e.g. https://www.pinterest.com/<owner>/<board>/
    board_url: String,

    /// Optional TOML config file.
    #[arg(long, env = "PINGRAB_CONFIG")]
    config: Option<PathBuf>,

    /// Override the feed page bound.
    #[arg(long)]
    max_pages: Option<u32>,

    /// Skip the browser harvest stage.
    #[arg(long)]
    no_browser: bool,

    /// Wall-clock budget in seconds.
    #[arg(long)]
    budget: Option<u64>,

    /// Emit the full result as JSON instead of a summary line.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pingrab=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => match ScrapeConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load config {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ScrapeConfig::default(),
    };
    if let Some(max_pages) = cli.max_pages {
        config.max_pages = max_pages;
    }
    if let Some(budget) = cli.budget {
        config.budget_secs = budget;
    }
    if cli.no_browser {
        config.browser.enabled = false;
    }

    match Scraper::new(config).run(&cli.board_url).await {
        Ok(outcome) => {
            if cli.json {
                match serde_json::to_string_pretty(&outcome) {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        eprintln!("failed to serialize result: {err}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                println!("{}", outcome.summary());
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("scrape failed: {err}");
            ExitCode::FAILURE
        }
    }
}
