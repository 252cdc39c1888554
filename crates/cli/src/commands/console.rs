use std::sync::Arc;
use std::time::Duration;

use cdp_broker::ConnectionManager;
use serde_json::json;
use tracing::info;

pub async fn execute(
    manager: Arc<ConnectionManager>,
    wait_ms: u64,
    clear: bool,
) -> anyhow::Result<()> {
    manager.ensure_connected().await?;
    info!(target = "cdp", wait_ms, "collecting console events");
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;

    let entries = manager.console_logs(clear);
    let report = json!({
        "count": entries.len(),
        "entries": entries,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
