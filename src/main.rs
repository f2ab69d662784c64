use anyhow::Result;
use clap::Parser;

use lotto_cache::{cli::Cli, cli::handle_command, utils::init_logger};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Remote fallbacks are logged at warn; verbose shows the debug trail too
    init_logger(if cli.verbose { "debug" } else { "warn" });

    let code = handle_command(&cli).await?;
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}
