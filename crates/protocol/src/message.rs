//! Command/response/event envelopes for the DevTools WebSocket channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing command frame. Every command carries a caller-assigned id that
/// the browser echoes back on the matching response.
#[derive(Debug, Serialize)]
pub struct CommandFrame<'a> {
	pub id: u64,
	pub method: &'a str,
	#[serde(skip_serializing_if = "Value::is_null")]
	pub params: Value,
}

/// Error object attached to a failed command response.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolError {
	#[serde(default)]
	pub code: Option<i64>,
	pub message: String,
}

impl std::fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.code {
			Some(code) => write!(f, "{} (code {code})", self.message),
			None => f.write_str(&self.message),
		}
	}
}

/// Any frame read off the socket. Replies carry `id`; events carry `method`.
#[derive(Debug, Deserialize)]
pub struct IncomingFrame {
	#[serde(default)]
	pub id: Option<u64>,
	#[serde(default)]
	pub method: Option<String>,
	#[serde(default)]
	pub params: Option<Value>,
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub error: Option<ProtocolError>,
}

/// An asynchronous event, already separated from command replies.
#[derive(Debug)]
pub struct EventFrame {
	pub method: String,
	pub params: Value,
}
