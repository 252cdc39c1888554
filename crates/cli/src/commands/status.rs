use std::sync::Arc;

use cdp_broker::ConnectionManager;
use serde_json::json;
use tracing::info;

pub async fn execute(manager: Arc<ConnectionManager>) -> anyhow::Result<()> {
    let session = manager.ensure_connected().await?;
    info!(target = "cdp", target_id = session.target_id(), "connected");

    let browser = manager
        .browser_version()
        .await
        .map(|version| version.browser)
        .unwrap_or_default();

    let config = manager.config();
    let status = json!({
        "host": config.host,
        "port": config.port,
        "browser": browser,
        "targetId": session.target_id(),
        "wsUrl": session.ws_url(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
