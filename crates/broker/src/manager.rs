//! Connection lifecycle manager: owns the single active session.
//!
//! State machine: Disconnected → Connecting → Live → Disconnected, with an
//! absorbing Shutdown state. All consumers enter through
//! [`ensure_connected`](ConnectionManager::ensure_connected); concurrent
//! callers never race separate connection attempts; callers that arrive
//! while a Connect Procedure is in flight await and share its result.
//! Reconnection is demand-driven only: a detected disconnect nulls the
//! handle, and the next `ensure_connected` call reconnects lazily.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::Shared;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cdp_protocol::{EventFrame, TargetInfo, VersionInfo};

use crate::config::BrokerConfig;
use crate::discovery;
use crate::error::{BrokerError, Result};
use crate::events::{ConsoleEntry, EventBuffers, NetworkEntry, run_ingestion};
use crate::launcher::{self, LaunchRecord};
use crate::platform;
use crate::session::Session;
use crate::transport::Transport;

const CONNECT_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(2);
const HTTP_TIMEOUT: Duration = Duration::from_secs(2);

type Connected = (Arc<Session>, mpsc::UnboundedReceiver<EventFrame>);
type ConnectFuture = Shared<Pin<Box<dyn Future<Output = Result<Arc<Session>>> + Send>>>;

pub struct ConnectionManager {
	inner: Arc<Inner>,
}

struct Inner {
	config: BrokerConfig,
	http: reqwest::Client,
	buffers: Arc<EventBuffers>,
	state: Mutex<ManagerState>,
	/// Connect Procedures started; diagnostic only.
	procedures: AtomicU64,
	/// Target discovery round-trips; diagnostic only.
	discoveries: AtomicU64,
}

#[derive(Default)]
struct ManagerState {
	session: Option<Arc<Session>>,
	inflight: Option<ConnectFuture>,
	launch: Option<LaunchRecord>,
	shut_down: bool,
	/// Bumped per Live transition so a disconnect observer only ever nulls
	/// the session it was installed for.
	generation: u64,
}

impl ConnectionManager {
	pub fn new(config: BrokerConfig) -> Result<Self> {
		let http = reqwest::Client::builder()
			.connect_timeout(HTTP_TIMEOUT)
			.timeout(HTTP_TIMEOUT)
			.build()
			.map_err(|err| BrokerError::Transport(format!("http client: {err}")))?;
		let buffers = Arc::new(EventBuffers::new(
			config.console_capacity,
			config.network_capacity,
		));
		Ok(Self {
			inner: Arc::new(Inner {
				config,
				http,
				buffers,
				state: Mutex::new(ManagerState::default()),
				procedures: AtomicU64::new(0),
				discoveries: AtomicU64::new(0),
			}),
		})
	}

	pub fn config(&self) -> &BrokerConfig {
		&self.inner.config
	}

	/// Sole entry point for every consumer needing a live session.
	///
	/// Fast path: an existing Live session is probed and returned as-is.
	/// Otherwise the caller either joins the in-flight Connect Procedure or
	/// starts one; exactly one procedure runs at a time and its result is
	/// shared with every caller that arrived while it was in flight.
	pub async fn ensure_connected(&self) -> Result<Arc<Session>> {
		let live = {
			let state = self.inner.state.lock();
			if state.shut_down {
				return Err(BrokerError::ShutDown);
			}
			state.session.clone()
		};

		if let Some(session) = live {
			match session.ping().await {
				Ok(()) => {
					debug!(target = "broker", target_id = session.target_id(), "reusing live session");
					return Ok(session);
				}
				Err(err) => {
					warn!(target = "broker", error = %err, "session stale, reconnecting");
					{
						let mut state = self.inner.state.lock();
						if state
							.session
							.as_ref()
							.is_some_and(|current| Arc::ptr_eq(current, &session))
						{
							state.session = None;
						}
					}
					// Close the stale transport so its read task winds down
					// instead of leaking the socket and feeding the shared
					// buffers alongside the replacement session.
					session.close().await;
				}
			}
		}

		let attempt = {
			let mut state = self.inner.state.lock();
			if state.shut_down {
				return Err(BrokerError::ShutDown);
			}
			// Another caller may have reconnected while we probed.
			if let Some(session) = state.session.clone() {
				return Ok(session);
			}
			if let Some(inflight) = state.inflight.clone() {
				inflight
			} else {
				let future: Pin<Box<dyn Future<Output = Result<Arc<Session>>> + Send>> =
					Box::pin(connect_procedure(Arc::clone(&self.inner)));
				let shared = future.shared();
				state.inflight = Some(shared.clone());
				shared
			}
		};

		attempt.await
	}

	/// Browser identity from the control endpoint's version route.
	pub async fn browser_version(&self) -> Result<VersionInfo> {
		let url = format!("{}/json/version", self.inner.config.http_base());
		let response = self
			.inner
			.http
			.get(&url)
			.send()
			.await
			.map_err(|err| BrokerError::Unreachable(format!("{url}: {err}")))?;
		response
			.json::<VersionInfo>()
			.await
			.map_err(|err| BrokerError::Protocol(format!("{url}: {err}")))
	}

	/// Console/browser-log entries collected so far. `clear` drains.
	pub fn console_logs(&self, clear: bool) -> Vec<ConsoleEntry> {
		self.inner.buffers.console(clear)
	}

	/// Completed network requests collected so far. `clear` drains.
	pub fn network_requests(&self, clear: bool) -> Vec<NetworkEntry> {
		self.inner.buffers.network(clear)
	}

	/// Number of Connect Procedures started by this manager.
	pub fn connect_procedures(&self) -> u64 {
		self.inner.procedures.load(Ordering::Relaxed)
	}

	/// Number of target-discovery round-trips issued.
	pub fn discovery_calls(&self) -> u64 {
		self.inner.discoveries.load(Ordering::Relaxed)
	}

	/// Tear down the live session, terminate any browser this instance
	/// launched, and delete the PID marker. Idempotent and absorbing: every
	/// later `ensure_connected` fails with [`BrokerError::ShutDown`].
	pub async fn shutdown(&self) {
		let (session, launch) = {
			let mut state = self.inner.state.lock();
			state.shut_down = true;
			(state.session.take(), state.launch.take())
		};
		if let Some(session) = session {
			session.close().await;
		}
		if let Some(record) = launch {
			info!(target = "broker", pid = record.pid, "terminating launched browser");
			platform::terminate_process_tree(record.pid);
			launcher::remove_marker(record.port);
		}
		self.inner.buffers.clear_pending();
	}
}

/// One full Connect Procedure. Runs inside the shared in-flight future;
/// responsible for clearing the in-flight slot and publishing the session.
async fn connect_procedure(inner: Arc<Inner>) -> Result<Arc<Session>> {
	let procedure = inner.procedures.fetch_add(1, Ordering::Relaxed) + 1;
	info!(target = "broker", procedure, "starting connect procedure");

	let result = run_connect(&inner).await;

	enum Outcome {
		Live(Arc<Session>, mpsc::UnboundedReceiver<EventFrame>, u64),
		AbortedByShutdown(Arc<Session>, Option<LaunchRecord>),
		Failed(BrokerError),
	}

	let outcome = {
		let mut state = inner.state.lock();
		state.inflight = None;
		match result {
			Ok((session, event_rx)) => {
				if state.shut_down {
					Outcome::AbortedByShutdown(session, state.launch.take())
				} else {
					state.generation += 1;
					state.session = Some(Arc::clone(&session));
					Outcome::Live(session, event_rx, state.generation)
				}
			}
			Err(err) => Outcome::Failed(err),
		}
	};

	match outcome {
		Outcome::Live(session, event_rx, generation) => {
			let observer = Arc::clone(&inner);
			let on_disconnect = move || handle_disconnect(&observer, generation);
			tokio::spawn(run_ingestion(
				event_rx,
				Arc::clone(&inner.buffers),
				on_disconnect,
			));
			info!(
				target = "broker",
				target_id = session.target_id(),
				ws_url = session.ws_url(),
				"session live"
			);
			Ok(session)
		}
		Outcome::AbortedByShutdown(session, launch) => {
			// Shutdown raced the connect; honor it and reap what we made.
			session.close().await;
			if let Some(record) = launch {
				platform::terminate_process_tree(record.pid);
				launcher::remove_marker(record.port);
			}
			Err(BrokerError::ShutDown)
		}
		Outcome::Failed(err) => {
			warn!(target = "broker", procedure, error = %err, "connect procedure failed");
			Err(err)
		}
	}
}

/// Disconnect observer body. The generation guard covers everything the
/// observer touches: one installed for a replaced session must neither null
/// the current handle nor wipe the current session's pending-request state.
fn handle_disconnect(inner: &Arc<Inner>, generation: u64) {
	{
		let mut state = inner.state.lock();
		if state.generation != generation {
			debug!(target = "broker", generation, "ignoring disconnect of a replaced session");
			return;
		}
		if state.session.take().is_some() {
			debug!(target = "broker", "session dropped; next call reconnects lazily");
		}
	}
	inner.buffers.clear_pending();
}

/// Orphan sweep, then the bounded direct-connect retry loop.
async fn run_connect(inner: &Arc<Inner>) -> Result<Connected> {
	let own_pid = inner.state.lock().launch.as_ref().map(|record| record.pid);
	launcher::sweep_orphan(inner.config.port, own_pid);

	let mut backoff = INITIAL_BACKOFF;
	let mut last_error: Option<BrokerError> = None;
	for attempt in 1..=CONNECT_ATTEMPTS {
		match connect_once(inner).await {
			Ok(connected) => return Ok(connected),
			Err(err) => {
				debug!(target = "broker", attempt, error = %err, "connect attempt failed");
				last_error = Some(err);
				if attempt < CONNECT_ATTEMPTS {
					tokio::time::sleep(backoff).await;
					backoff = (backoff * 2).min(MAX_BACKOFF);
				}
			}
		}
	}

	let detail = last_error
		.map(|err| err.to_string())
		.unwrap_or_else(|| "no attempt ran".to_string());
	Err(BrokerError::Unreachable(format!(
		"giving up after {CONNECT_ATTEMPTS} attempts: {detail}"
	)))
}

/// One attempt: direct connect, optionally followed by auto-launch plus
/// exactly one retry. A configured direct override never falls back.
async fn connect_once(inner: &Arc<Inner>) -> Result<Connected> {
	let connected = match direct_connect(inner).await {
		Ok(connected) => connected,
		Err(err) => {
			if inner.config.ws_override.is_some() || !inner.config.auto_launch {
				return Err(err);
			}
			debug!(target = "broker", error = %err, "direct connect failed, trying auto-launch");
			launch_and_retry(inner).await?
		}
	};

	let (session, event_rx) = connected;
	if let Err(err) = session.enable_domains().await {
		session.close().await;
		return Err(err);
	}
	Ok((session, event_rx))
}

/// Discover targets fresh (never a cached address) and open the transport.
async fn direct_connect(inner: &Arc<Inner>) -> Result<Connected> {
	let (ws_url, target_id) = match &inner.config.ws_override {
		Some(ws_url) => (ws_url.clone(), "direct-override".to_string()),
		None => {
			let targets = discover_targets(inner).await?;
			let target = pick_target(&targets).ok_or_else(|| {
				BrokerError::Unreachable("no debuggable targets exposed".to_string())
			})?;
			let ws_url = target.web_socket_debugger_url.clone().ok_or_else(|| {
				BrokerError::Unreachable(format!("target {} has no debugger url", target.id))
			})?;
			(ws_url, target.id.clone())
		}
	};

	let (event_tx, event_rx) = mpsc::unbounded_channel();
	let transport = Transport::connect(&ws_url, event_tx).await?;
	let session = Arc::new(Session::new(transport, target_id, ws_url));
	Ok((session, event_rx))
}

async fn discover_targets(inner: &Arc<Inner>) -> Result<Vec<TargetInfo>> {
	inner.discoveries.fetch_add(1, Ordering::Relaxed);
	let url = format!("{}/json/list", inner.config.http_base());
	let response = inner
		.http
		.get(&url)
		.send()
		.await
		.map_err(|err| BrokerError::Unreachable(format!("{url}: {err}")))?;
	if !response.status().is_success() {
		return Err(BrokerError::Unreachable(format!(
			"{url}: HTTP {}",
			response.status()
		)));
	}
	response
		.json::<Vec<TargetInfo>>()
		.await
		.map_err(|err| BrokerError::Protocol(format!("{url}: {err}")))
}

/// Preference order: loaded page targets on loopback addresses, then any
/// other page target, then the first target of any kind.
fn pick_target(targets: &[TargetInfo]) -> Option<&TargetInfo> {
	let connectable: Vec<&TargetInfo> = targets
		.iter()
		.filter(|target| target.web_socket_debugger_url.is_some())
		.collect();
	connectable
		.iter()
		.find(|target| target.is_loopback_page())
		.or_else(|| connectable.iter().find(|target| target.is_page()))
		.copied()
		.or_else(|| connectable.first().copied())
}

/// Reconcile any stuck browser this run launched earlier, launch a fresh
/// instance, then retry the direct connect exactly once.
async fn launch_and_retry(inner: &Arc<Inner>) -> Result<Connected> {
	let previous = inner.state.lock().launch.take();
	if let Some(record) = previous {
		if platform::process_alive(record.pid) {
			warn!(
				target = "broker.launch",
				pid = record.pid,
				"previously launched browser is alive but unreachable; killing stuck instance"
			);
			platform::terminate_process_tree(record.pid);
		}
		launcher::remove_marker(record.port);
	}

	let executable = discovery::find_browser(&inner.config).ok_or_else(|| {
		BrokerError::LaunchFailed(
			"no browser executable found (set CDP_BROWSER_PATH to override)".to_string(),
		)
	})?;
	let record = launcher::launch(&inner.config, &executable, &inner.http).await?;
	inner.state.lock().launch = Some(record);

	direct_connect(inner).await
}
