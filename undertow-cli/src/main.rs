//! Undertow CLI - Command-line interface
//!
//! Downloads and seeds content described by a torrent file.

mod commands;

use clap::Parser;
use undertow_core::UndertowError;
use undertow_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "undertow")]
#[command(about = "A peer-to-peer file transfer client")]
struct Cli {
    /// Console log level; the full trace always goes to logs/undertow-last-run.log
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), None)?;

    let result = commands::handle_command(cli.command).await;
    if let Err(e) = &result
        && let Some(error) = e.downcast_ref::<UndertowError>()
    {
        tracing::error!(error = %error, "Command failed");
        eprintln!("{}", error.user_message());
        if error.is_user_error() {
            std::process::exit(2);
        }
    }
    result
}
