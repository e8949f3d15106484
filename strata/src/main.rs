mod commands;
mod logging;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::logging::init_logging;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(version, about)]
/// strata, a compressed columnar store for analytical rows.
///
/// Inspects, verifies and compacts stores on disk.
pub struct Args {
    #[arg(long, env = "STRATA_LOG_LEVEL", default_value = "info")]
    /// Set the log level of the tool.
    ///
    /// A bare level such as `debug` applies to the strata crates while
    /// dependencies only report warnings. A full filter such as
    /// `info,strata_store=debug` is used as given.
    log_level: String,
    #[arg(long, env = "STRATA_LOG_JSON")]
    /// Emit logs in JSON format rather than as plain text.
    log_json: bool,
    #[arg(long, env = "STRATA_LOG_NO_ANSI")]
    /// Disable ANSI colour codes being present in the logs.
    log_no_ansi: bool,
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args).context("Init logging")?;

    info!("strata v{}", env!("CARGO_PKG_VERSION"));
    args.command.display_startup_message();
    args.command.execute().await
}
