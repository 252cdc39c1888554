mod console;
mod network;
mod status;
mod stop;

use std::future::Future;
use std::sync::Arc;

use cdp_broker::{BrokerConfig, ConnectionManager};

use crate::cli::Commands;

pub async fn dispatch(command: Commands) -> anyhow::Result<()> {
    let config = BrokerConfig::from_env();

    match command {
        Commands::Status => with_manager(config, status::execute).await,
        Commands::Console { wait_ms, clear } => {
            with_manager(config, move |manager| console::execute(manager, wait_ms, clear)).await
        }
        Commands::Network { wait_ms, clear } => {
            with_manager(config, move |manager| network::execute(manager, wait_ms, clear)).await
        }
        Commands::Stop => stop::execute(config).await,
    }
}

/// Run one session-backed command, then the shutdown path, so a browser
/// launched for this invocation never outlives it.
async fn with_manager<F, Fut>(config: BrokerConfig, run: F) -> anyhow::Result<()>
where
    F: FnOnce(Arc<ConnectionManager>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let manager = Arc::new(ConnectionManager::new(config)?);
    let result = run(Arc::clone(&manager)).await;
    manager.shutdown().await;
    result
}
