// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deskline - AI-to-human hand-off for support chat.
//!
//! This is the binary entry point.

mod check;
mod demo;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::demo::Scenario;

/// Deskline - AI-to-human hand-off for support chat.
#[derive(Parser, Debug)]
#[command(name = "deskline", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the XDG hierarchy.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and print the effective values.
    Check {
        /// Print JSON instead of TOML.
        #[arg(long)]
        json: bool,
        /// Disable colored output.
        #[arg(long)]
        plain: bool,
    },
    /// Walk through the hand-off scenarios on a scratch database.
    Demo {
        #[arg(long, value_enum, default_value_t = Scenario::All)]
        scenario: Scenario,
        /// SQLite file to use instead of a temporary one.
        #[arg(long)]
        database: Option<PathBuf>,
        /// Disable colored output.
        #[arg(long)]
        plain: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => deskline_config::load_and_validate_path(path),
        None => deskline_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            deskline_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.app.log_level);

    let result = match cli.command {
        Some(Commands::Check { json, plain }) => check::run_check(&config, json, plain),
        Some(Commands::Demo {
            scenario,
            database,
            plain,
        }) => demo::run_demo(config, scenario, database, plain).await,
        None => {
            println!("deskline: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("deskline: {e}");
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deskline={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn demo_defaults_to_all_scenarios() {
        let cli = Cli::try_parse_from(["deskline", "demo"]).unwrap();
        match cli.command {
            Some(Commands::Demo {
                scenario, database, ..
            }) => {
                assert_eq!(scenario, Scenario::All);
                assert!(database.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["deskline", "check", "--config", "/tmp/d.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/d.toml")));
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = deskline_config::load_and_validate_str("")
            .expect("default config should be valid");
        assert_eq!(config.app.name, "deskline");
    }
}
