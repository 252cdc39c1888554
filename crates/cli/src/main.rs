mod cli;
mod commands;
mod logging;

use clap::Parser;
use cli::Cli;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    if let Err(err) = commands::dispatch(cli.command).await {
        error!(target = "cdp", error = %err, "command failed");
        std::process::exit(1);
    }
}
