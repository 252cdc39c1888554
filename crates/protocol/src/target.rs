//! Discovery types served by the browser's HTTP debugging endpoints.

use serde::{Deserialize, Serialize};

/// One inspectable target from `/json/list` (a tab, service worker, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub id: String,
	/// Target kind as reported by the browser (`page`, `iframe`, `worker`, ...).
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub url: String,
	/// Absent for targets that already have a debugger attached.
	#[serde(default)]
	pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
	pub fn is_page(&self) -> bool {
		self.kind == "page"
	}

	/// Whether the page itself is serving from a loopback address, which is
	/// the usual shape of a local dev server tab.
	pub fn is_loopback_page(&self) -> bool {
		self.is_page() && host_is_loopback(&self.url)
	}
}

/// Browser identity from `/json/version`. Used as the launch readiness probe.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
	#[serde(rename = "Browser", default)]
	pub browser: String,
	#[serde(rename = "webSocketDebuggerUrl", default)]
	pub web_socket_debugger_url: Option<String>,
}

fn host_is_loopback(url: &str) -> bool {
	let Some(rest) = url.split("://").nth(1) else {
		return false;
	};
	let authority = rest.split('/').next().unwrap_or(rest);
	// A bracketed IPv6 host carries colons of its own; only strip a port
	// from unbracketed authorities.
	let host = match authority.strip_prefix('[') {
		Some(bracketed) => bracketed.split(']').next().unwrap_or(bracketed),
		None => authority.split(':').next().unwrap_or(authority),
	};
	matches!(host, "localhost" | "127.0.0.1" | "::1" | "0.0.0.0")
}
