//! Environment-driven configuration for the broker core.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Configuration surface consumed by the broker. Built from `CDP_*`
/// environment variables; invalid values fall back to defaults with a
/// warning rather than failing startup.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
	/// Host of the remote debugging endpoint.
	pub host: String,
	/// Remote debugging port; also scopes the PID marker and profile dir.
	pub port: u16,
	/// Whether the broker may launch a browser when none is reachable.
	pub auto_launch: bool,
	/// Explicit browser executable path, overriding discovery.
	pub executable: Option<PathBuf>,
	/// Direct WebSocket address. Bypasses target discovery and auto-launch.
	pub ws_override: Option<String>,
	/// Page opened when the broker launches the browser itself.
	pub initial_url: Option<String>,
	pub console_capacity: usize,
	pub network_capacity: usize,
	/// Per-managed-process log buffer capacity.
	pub process_log_capacity: usize,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 9222,
			auto_launch: true,
			executable: None,
			ws_override: None,
			initial_url: None,
			console_capacity: 500,
			network_capacity: 500,
			process_log_capacity: 1000,
		}
	}
}

impl BrokerConfig {
	pub fn from_env() -> Self {
		let defaults = Self::default();
		Self {
			host: std::env::var("CDP_HOST").unwrap_or(defaults.host),
			port: parsed_var("CDP_PORT", defaults.port),
			auto_launch: std::env::var("CDP_AUTO_LAUNCH")
				.map(|raw| parse_bool(&raw))
				.unwrap_or(defaults.auto_launch),
			executable: std::env::var("CDP_BROWSER_PATH").ok().map(PathBuf::from),
			ws_override: std::env::var("CDP_WS_URL").ok().filter(|s| !s.is_empty()),
			initial_url: std::env::var("CDP_STARTUP_URL").ok().filter(|s| !s.is_empty()),
			console_capacity: parsed_var("CDP_CONSOLE_BUFFER", defaults.console_capacity),
			network_capacity: parsed_var("CDP_NETWORK_BUFFER", defaults.network_capacity),
			process_log_capacity: parsed_var(
				"CDP_PROCESS_LOG_BUFFER",
				defaults.process_log_capacity,
			),
		}
	}

	/// Base URL of the HTTP discovery endpoints.
	pub fn http_base(&self) -> String {
		format!("http://{}:{}", self.host, self.port)
	}
}

fn parsed_var<T: FromStr + Copy>(name: &str, default: T) -> T {
	match std::env::var(name) {
		Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
			warn!(target = "broker", var = name, value = %raw, "invalid value, using default");
			default
		}),
		Err(_) => default,
	}
}

fn parse_bool(raw: &str) -> bool {
	!matches!(
		raw.trim().to_ascii_lowercase().as_str(),
		"0" | "false" | "no" | "off"
	)
}
