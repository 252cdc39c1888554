use cdp_broker::{BrokerConfig, sweep_orphan};
use tracing::info;

/// Reap any browser a previous run of this tool left behind on the
/// configured port. The sweep refuses to kill a pid whose executable no
/// longer looks like the browser, so a recycled pid is never harmed.
pub async fn execute(config: BrokerConfig) -> anyhow::Result<()> {
    info!(target = "cdp", port = config.port, "sweeping for an owned browser");
    sweep_orphan(config.port, None);
    println!("stopped");
    Ok(())
}
