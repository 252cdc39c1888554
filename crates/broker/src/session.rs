//! Session handle: one live connection to a debugging target.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use crate::error::{BrokerError, Result};
use crate::transport::Transport;

const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Protocol domains enabled on every fresh connection, in order.
const REQUIRED_DOMAINS: &[&str] = &[
	"Runtime.enable",
	"Log.enable",
	"Network.enable",
	"Page.enable",
];

/// Live capability reference to one connected debugging target.
///
/// Owned by the connection manager; collaborator operations borrow it as an
/// `Arc` for the duration of one operation and issue capability calls via
/// [`send`](Self::send).
pub struct Session {
	transport: Arc<Transport>,
	target_id: String,
	ws_url: String,
}

impl Session {
	pub(crate) fn new(transport: Arc<Transport>, target_id: String, ws_url: String) -> Self {
		Self {
			transport,
			target_id,
			ws_url,
		}
	}

	pub fn target_id(&self) -> &str {
		&self.target_id
	}

	pub fn ws_url(&self) -> &str {
		&self.ws_url
	}

	/// Issue a protocol command against this session.
	pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
		self.transport.send(method, params).await
	}

	/// Enable every capability the broker depends on. Idempotent; run on
	/// every fresh connection.
	pub(crate) async fn enable_domains(&self) -> Result<()> {
		for method in REQUIRED_DOMAINS {
			self.transport.send(method, Value::Null).await?;
		}
		debug!(target = "broker", target_id = %self.target_id, "protocol domains enabled");
		Ok(())
	}

	/// Cheap liveness probe. Failure means the session is stale, which is a
	/// reconnect trigger, not a hard failure.
	pub async fn ping(&self) -> Result<()> {
		if self.transport.is_closed() {
			return Err(BrokerError::Stale("transport already closed".to_string()));
		}
		self.transport
			.send_with_timeout(
				"Runtime.evaluate",
				json!({"expression": "1", "returnByValue": true}),
				PING_TIMEOUT,
			)
			.await
			.map(|_| ())
			.map_err(|err| BrokerError::Stale(err.to_string()))
	}

	pub(crate) async fn close(&self) {
		self.transport.close().await;
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("target_id", &self.target_id)
			.field("ws_url", &self.ws_url)
			.finish()
	}
}
