//! CLI argument definitions for `intentd`.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// intentd -- turns intents from files, screen markers and chat into
/// desktop automation recipes.
#[derive(Parser)]
#[command(
    name = "intentd",
    version,
    about = "intentd -- intent orchestration and recipe execution",
    long_about = "Watches an intents directory, scans the screen for intent markers and \
                  accepts chat commands, then runs the matching recipe one at a time."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = "intentd.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestrator: watcher, OCR scanner, chat bridge and executor.
    Run {
        /// Activate a named profile instead of the configured default.
        #[arg(long, short)]
        profile: Option<String>,

        /// Permit the focus-tap click fallback regardless of the profile.
        #[arg(long)]
        allow_focus_tap: bool,

        /// Load and validate configuration, catalog and recipes, then exit.
        #[arg(long)]
        dry_run: bool,

        /// Do not read chat commands from stdin.
        #[arg(long)]
        no_chat: bool,

        /// Do not start the OCR scanner.
        #[arg(long)]
        no_ocr: bool,
    },

    /// Print the intent catalog.
    Catalog {
        /// Only show intents related to this topic.
        #[arg(long, short)]
        topic: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "intentd",
            "run",
            "--profile",
            "safe",
            "--allow-focus-tap",
            "--no-ocr",
        ])
        .expect("parses");
        assert_eq!(cli.config, PathBuf::from("intentd.toml"));
        match cli.command {
            Commands::Run {
                profile,
                allow_focus_tap,
                dry_run,
                no_chat,
                no_ocr,
            } => {
                assert_eq!(profile.as_deref(), Some("safe"));
                assert!(allow_focus_tap);
                assert!(!dry_run);
                assert!(!no_chat);
                assert!(no_ocr);
            }
            Commands::Catalog { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn config_is_global() {
        let cli = Cli::try_parse_from(["intentd", "catalog", "--config", "x.toml", "-t", "browser"])
            .expect("parses");
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(cli.command, Commands::Catalog { topic: Some(ref t) } if t == "browser"));
    }
}
