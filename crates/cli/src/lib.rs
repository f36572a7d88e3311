pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use slotform_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "slotform",
    about = "Slotform operator CLI",
    long_about = "Chat with a business line's order form, list and validate business configs, and inspect configuration.",
    after_help = "Examples:\n  slotform chat --business dining\n  slotform chat --no-model\n  slotform businesses\n  slotform check\n  slotform config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load instead of slotform.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive order session on stdin/stdout")]
    Chat {
        #[arg(long, help = "Business line id (defaults to business.default_line)")]
        business: Option<String>,
        #[arg(long, help = "Skip the external model layer even when one is configured")]
        no_model: bool,
    },
    #[command(about = "List loaded business lines with slot counts")]
    Businesses,
    #[command(about = "Load and validate every business config file")]
    Check,
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    let result = match cli.command {
        Command::Chat { business, no_model } => commands::chat::run(options, business, no_model),
        Command::Businesses => commands::businesses::run(options),
        Command::Check => commands::check::run(options),
        Command::Config => commands::config::run(options),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}

/// Installs the stderr subscriber once; later calls are no-ops.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder =
        tracing_subscriber::fmt().with_target(false).with_max_level(log_level).with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
