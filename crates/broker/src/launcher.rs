//! Browser launch, readiness polling, and cross-run orphan handling.
//!
//! A launched browser is spawned detached into its own process group with a
//! port-scoped profile directory, so it survives the host process and
//! concurrent runs on different ports never collide. Its pid is persisted
//! as a marker file (`<tmp>/cdp-broker-<port>.pid`, plain textual pid) so a
//! later run can detect and reap an orphan left by an unclean shutdown.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::discovery;
use crate::error::{BrokerError, Result};
use crate::platform;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);
const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const READY_DEADLINE: Duration = Duration::from_secs(10);

/// A browser process this run started itself.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
	pub pid: u32,
	pub port: u16,
	pub started_at: SystemTime,
}

pub fn marker_path(port: u16) -> PathBuf {
	std::env::temp_dir().join(format!("cdp-broker-{port}.pid"))
}

pub fn write_marker(port: u16, pid: u32) {
	let path = marker_path(port);
	if let Err(err) = std::fs::write(&path, pid.to_string()) {
		warn!(target = "broker.launch", path = %path.display(), error = %err, "failed to write pid marker");
	}
}

pub fn read_marker(port: u16) -> Option<u32> {
	let raw = std::fs::read_to_string(marker_path(port)).ok()?;
	raw.trim().parse().ok()
}

pub fn remove_marker(port: u16) {
	let path = marker_path(port);
	if path.exists() {
		if let Err(err) = std::fs::remove_file(&path) {
			warn!(target = "broker.launch", path = %path.display(), error = %err, "failed to remove pid marker");
		}
	}
}

/// Reap a browser left behind by a previous run of this tool.
///
/// Only acts when a marker exists for `port` and the recorded pid is not
/// `own_pid` (this run's own Launch Record). The pid must be alive AND its
/// executable name must look like the browser before anything is killed;
/// operating systems recycle pids, and a mismatch means the marker is stale:
/// it is discarded without killing.
pub fn sweep_orphan(port: u16, own_pid: Option<u32>) {
	let Some(pid) = read_marker(port) else {
		return;
	};
	if Some(pid) == own_pid {
		return;
	}
	if !platform::process_alive(pid) {
		debug!(target = "broker.launch", pid, port, "stale pid marker (process gone), removing");
		remove_marker(port);
		return;
	}
	match platform::process_name(pid) {
		Some(name) if discovery::looks_like_browser(&name) => {
			info!(target = "broker.launch", pid, port, %name, "reaping orphaned browser from previous run");
			platform::terminate_process_tree(pid);
			remove_marker(port);
		}
		name => {
			warn!(
				target = "broker.launch",
				pid,
				port,
				name = name.as_deref().unwrap_or("<unknown>"),
				"pid marker points at a different process; discarding without killing"
			);
			remove_marker(port);
		}
	}
}

/// Spawn the browser and block until its control endpoint answers, or kill
/// the partially started process tree and fail.
pub async fn launch(
	config: &BrokerConfig,
	executable: &std::path::Path,
	http: &reqwest::Client,
) -> Result<LaunchRecord> {
	let profile_dir = std::env::temp_dir().join(format!("cdp-broker-profile-{}", config.port));
	std::fs::create_dir_all(&profile_dir)
		.map_err(|err| BrokerError::LaunchFailed(format!("cannot create profile dir: {err}")))?;

	let mut cmd = Command::new(executable);
	cmd.arg(format!("--remote-debugging-port={}", config.port))
		.arg(format!("--user-data-dir={}", profile_dir.display()))
		.arg("--no-first-run")
		.arg("--no-default-browser-check")
		.stdin(std::process::Stdio::null())
		.stdout(std::process::Stdio::null())
		.stderr(std::process::Stdio::null());
	if let Some(url) = &config.initial_url {
		cmd.arg(url);
	}
	// Detach: the browser is deliberately left running across tool calls,
	// and the group id doubles as the tree-kill handle.
	#[cfg(unix)]
	cmd.process_group(0);

	let child = cmd.spawn().map_err(|err| {
		BrokerError::LaunchFailed(format!("spawn of {} failed: {err}", executable.display()))
	})?;
	let pid = child
		.id()
		.ok_or_else(|| BrokerError::LaunchFailed("spawned browser has no pid".to_string()))?;

	info!(target = "broker.launch", pid, port = config.port, "browser launched, waiting for endpoint");
	write_marker(config.port, pid);

	let base = config.http_base();
	let deadline = tokio::time::Instant::now() + READY_DEADLINE;
	loop {
		if probe_endpoint(http, &base).await {
			debug!(target = "broker.launch", pid, "endpoint ready");
			break;
		}
		if tokio::time::Instant::now() >= deadline {
			warn!(target = "broker.launch", pid, "readiness deadline exceeded, killing launch");
			platform::terminate_process_tree(pid);
			remove_marker(config.port);
			return Err(BrokerError::LaunchFailed(format!(
				"control endpoint {base} not ready within {}s",
				READY_DEADLINE.as_secs()
			)));
		}
		tokio::time::sleep(READY_POLL_INTERVAL).await;
	}

	Ok(LaunchRecord {
		pid,
		port: config.port,
		started_at: SystemTime::now(),
	})
}

/// One bounded readiness probe against `/json/version`.
pub async fn probe_endpoint(http: &reqwest::Client, base: &str) -> bool {
	let request = http
		.get(format!("{base}/json/version"))
		.timeout(READY_PROBE_TIMEOUT)
		.send();
	match request.await {
		Ok(response) => response.status().is_success(),
		Err(_) => false,
	}
}
