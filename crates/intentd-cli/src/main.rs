//! CLI entry point for intentd.
//!
//! This binary provides the `intentd` command: `run` starts the orchestrator
//! and `catalog` prints the known intents.

mod cli;
mod config;
mod helpers;
mod profiles;
mod reporter;
mod runtime;

use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

use intentd_intent::IntentCatalog;
use intentd_platform::Platform;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::helpers::{init_tracing, load_dotenv};
use crate::profiles::Toggle;
use crate::runtime::{Features, Runtime};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let dotenv = load_dotenv();

    let config = Config::load(&cli.config)?;
    init_tracing(&config.logging.level);
    if let Some(path) = dotenv {
        info!(path = %path.display(), "environment loaded from .env");
    }
    info!(config = %cli.config.display(), found = cli.config.exists(), "configuration loaded");

    match cli.command {
        Commands::Run {
            profile,
            allow_focus_tap,
            dry_run,
            no_chat,
            no_ocr,
        } => {
            let options = RunOptions {
                profile,
                allow_focus_tap,
                dry_run,
                features: Features {
                    chat: !no_chat,
                    ocr: !no_ocr,
                },
            };
            cmd_run(config, options).await
        }
        Commands::Catalog { topic } => cmd_catalog(&config, topic.as_deref()).map(|()| ExitCode::SUCCESS),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

struct RunOptions {
    profile: Option<String>,
    allow_focus_tap: bool,
    dry_run: bool,
    features: Features,
}

async fn cmd_run(config: Config, options: RunOptions) -> Result<ExitCode> {
    let mut profiles = config.profiles.manager()?;
    if let Some(name) = &options.profile {
        profiles.activate(name)?;
    }
    if options.allow_focus_tap {
        profiles.set_toggle(Toggle::FocusTap, true);
    }
    let toggles = profiles.current();
    info!(
        profile = profiles.active(),
        description = profiles.description(),
        focus_tap = toggles.focus_tap,
        coordinate_clicks = toggles.coordinate_clicks,
        "profile active"
    );

    let clicks = toggles.click_options(config.click.attempt_timeout());
    let runtime = Runtime::build(config, clicks, Platform::native())?;

    let problems = runtime.check_recipes();
    for problem in &problems {
        warn!(problem = %problem, "recipe check failed");
    }

    if options.dry_run {
        if !problems.is_empty() {
            bail!("{} intent(s) reference missing or invalid recipes", problems.len());
        }
        println!(
            "  Configuration OK: {} intents, profile '{}'.",
            runtime.catalog().len(),
            profiles.active()
        );
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!("  intentd v{}", env!("CARGO_PKG_VERSION"));
    if runtime.platform().has_global_hotkeys() {
        println!(
            "  Emergency stop: {} or Ctrl-C.",
            runtime.coordinator().combo()
        );
    } else {
        println!("  Emergency stop: Ctrl-C (no global hotkey support on this host).");
    }
    println!();

    let summary = runtime
        .serve(
            options.features,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await
        .context("session failed")?;

    for (source, tally) in &summary.tallies {
        info!(
            source = %source,
            completed = tally.completed,
            failed = tally.failed,
            cancelled = tally.cancelled,
            suppressed = tally.suppressed,
            rejected = tally.rejected,
            "session summary"
        );
    }

    if summary.emergency.is_some() {
        // A pending stdin read cannot be cancelled and would hold the
        // runtime open until the next newline.
        std::process::exit(130);
    }
    info!("shutting down");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Subcommand: catalog
// ---------------------------------------------------------------------------

fn cmd_catalog(config: &Config, topic: Option<&str>) -> Result<()> {
    let path = &config.paths.catalog;
    let catalog =
        IntentCatalog::load(path).with_context(|| format!("failed to load catalog {}", path.display()))?;
    let entries = catalog.filter_by_topic(topic.unwrap_or(""));
    if let Some(topic) = topic
        && entries.is_empty()
    {
        println!("  No intents match `{topic}`.");
        return Ok(());
    }
    println!("{}", IntentCatalog::render_table(entries));
    Ok(())
}
