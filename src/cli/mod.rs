//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- run the webhook server
//! - `config show|path` -- inspect the effective configuration
//! - `tools convert --to <format> [file]` -- convert tool declarations
//! - `version` -- print build/version info

use crate::config::{self, Config};
use crate::tools::{convert_definitions, declarations_from_document, ToolFormat};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Call-control webhook orchestrator and tool-calling bridge.
#[derive(Parser, Debug)]
#[command(
    name = "switchboard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Telephony webhook orchestrator and cross-vendor tool bridge"
)]
pub struct Cli {
    /// Config file (default: $SWITCHBOARD_CONFIG, then ./switchboard.json5).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Tool declaration utilities.
    #[command(subcommand)]
    Tools(ToolsCommand),

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration (secrets redacted) as JSON.
    Show,

    /// Print the config file path that would be loaded.
    Path,
}

#[derive(Subcommand, Debug)]
pub enum ToolsCommand {
    /// Convert tool declarations into another vendor format.
    Convert {
        /// Target format: a (function calling), b (tool blocks) or c (custom LLM).
        #[arg(long, value_parser = parse_format)]
        to: ToolFormat,

        /// JSON file holding an array of declarations (default: stdin).
        file: Option<PathBuf>,
    },
}

fn parse_format(value: &str) -> Result<ToolFormat, String> {
    ToolFormat::from_tag(value).ok_or_else(|| format!("unknown tool format: {}", value))
}

/// Load the config the server would use.
pub fn load(explicit: Option<&Path>) -> Result<Config, config::ConfigError> {
    config::load_config(&config::config_path(explicit))
}

/// Run the `config show` subcommand.
pub fn handle_config_show(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load(explicit)?;
    let pretty = serde_json::to_string_pretty(&config::redacted(&cfg))?;
    println!("{}", pretty);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(explicit: Option<&Path>) {
    let path = config::config_path(explicit);
    let note = if path.exists() { "" } else { " (not found, defaults apply)" };
    println!("{}{}", path.display(), note);
}

/// Run the `tools convert` subcommand.
pub fn handle_tools_convert(
    to: ToolFormat,
    file: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let converted = convert_document(&serde_json::from_str(&input)?, to);
    println!("{}", serde_json::to_string_pretty(&converted)?);
    Ok(())
}

/// Convert an array of declarations, a `{tools: [...]}` wrapper or a single
/// declaration.
fn convert_document(document: &Value, to: ToolFormat) -> Value {
    Value::Array(convert_definitions(&declarations_from_document(document), to))
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("switchboard {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("SWITCHBOARD_BUILD_DATE"));
    println!("  Git commit: {}", env!("SWITCHBOARD_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}
