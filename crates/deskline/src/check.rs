// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `deskline check` command implementation.
//!
//! Configuration has already been loaded and validated by the time this
//! runs; the command prints the effective values so an operator can see
//! what the defaults and overrides resolved to.

use std::io::IsTerminal;

use deskline_config::DesklineConfig;
use deskline_core::DesklineError;

/// Run the `deskline check` command.
///
/// With `--json`, prints the configuration as JSON for scripting.
/// With `--plain` (or when stdout is not a TTY), disables colors.
pub fn run_check(config: &DesklineConfig, json: bool, plain: bool) -> Result<(), DesklineError> {
    let rendered = render(config, json)?;
    if json {
        println!("{rendered}");
        return Ok(());
    }

    let use_color = !plain && std::io::stdout().is_terminal();
    if use_color {
        use colored::Colorize;
        println!("{} configuration is valid", "✓".green());
    } else {
        println!("[OK] configuration is valid");
    }
    println!();
    print!("{rendered}");
    Ok(())
}

fn render(config: &DesklineConfig, json: bool) -> Result<String, DesklineError> {
    if json {
        serde_json::to_string_pretty(config)
            .map_err(|e| DesklineError::Internal(format!("failed to render config as JSON: {e}")))
    } else {
        toml::to_string_pretty(config)
            .map_err(|e| DesklineError::Internal(format!("failed to render config as TOML: {e}")))
    }
}
