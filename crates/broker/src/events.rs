//! Event ingestion: normalizes the session's asynchronous event stream into
//! the bounded console and network buffers.
//!
//! Ingestion is push-driven and never blocks on a consumer: every write
//! lands in a ring buffer. A malformed event is swallowed with a debug log;
//! one bad payload must not interrupt the stream.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use cdp_protocol::{
	ConsoleApiCalled, EventFrame, LoadingFailed, LogEntryAdded, ObjectShape, RemoteObject,
	RequestWillBeSent, ResponseReceived,
};

use crate::ring::RingBuffer;

/// One rendered console or browser-log message.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEntry {
	pub timestamp_ms: u64,
	pub level: String,
	pub message: String,
}

/// One completed network request, emitted exactly once per request id.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkEntry {
	pub request_id: String,
	pub url: String,
	pub method: String,
	pub status: Option<i64>,
	/// Wall time between request start and its terminal event.
	pub elapsed_ms: f64,
	pub error: Option<String>,
	pub timestamp_ms: u64,
}

/// Shadow record bridging request-started to its terminal event.
struct PendingRequest {
	url: String,
	method: String,
	started: f64,
}

/// Insertion-ordered pending map with oldest-first eviction, so a flood of
/// never-finishing requests cannot grow without bound.
struct PendingMap {
	map: HashMap<String, PendingRequest>,
	order: VecDeque<String>,
	capacity: usize,
}

impl PendingMap {
	fn new(capacity: usize) -> Self {
		Self {
			map: HashMap::new(),
			order: VecDeque::new(),
			capacity: capacity.max(1),
		}
	}

	fn insert(&mut self, id: String, request: PendingRequest) {
		if !self.map.contains_key(&id) && self.map.len() == self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.map.remove(&oldest);
			}
		}
		if self.map.insert(id.clone(), request).is_none() {
			self.order.push_back(id);
		}
	}

	fn take(&mut self, id: &str) -> Option<PendingRequest> {
		let removed = self.map.remove(id);
		if removed.is_some() {
			self.order.retain(|known| known != id);
		}
		removed
	}

	fn clear(&mut self) {
		self.map.clear();
		self.order.clear();
	}
}

/// The console/network ring buffers plus the pending-request shadow state.
/// Ingestion is the only writer; consumers peek or drain.
pub(crate) struct EventBuffers {
	console: Mutex<RingBuffer<ConsoleEntry>>,
	network: Mutex<RingBuffer<NetworkEntry>>,
	pending: Mutex<PendingMap>,
}

impl EventBuffers {
	pub(crate) fn new(console_capacity: usize, network_capacity: usize) -> Self {
		Self {
			console: Mutex::new(RingBuffer::new(console_capacity)),
			network: Mutex::new(RingBuffer::new(network_capacity)),
			// Twice the visible window: a pending evicted here whose
			// terminal event arrives later is silently dropped.
			pending: Mutex::new(PendingMap::new(network_capacity.max(1) * 2)),
		}
	}

	pub(crate) fn console(&self, clear: bool) -> Vec<ConsoleEntry> {
		let mut buffer = self.console.lock();
		if clear { buffer.drain() } else { buffer.peek() }
	}

	pub(crate) fn network(&self, clear: bool) -> Vec<NetworkEntry> {
		let mut buffer = self.network.lock();
		if clear { buffer.drain() } else { buffer.peek() }
	}

	pub(crate) fn clear_pending(&self) {
		self.pending.lock().clear();
	}

	/// Classify and absorb one event. Unknown methods and malformed
	/// payloads are no-ops.
	pub(crate) fn ingest(&self, method: &str, params: Value) {
		match method {
			"Runtime.consoleAPICalled" => self.on_console_api(params),
			"Log.entryAdded" => self.on_log_entry(params),
			"Network.requestWillBeSent" => self.on_request_started(params),
			"Network.responseReceived" => self.on_response(params),
			"Network.loadingFailed" => self.on_failure(params),
			_ => trace!(target = "broker.net", method, "ignoring event"),
		}
	}

	fn on_console_api(&self, params: Value) {
		let event: ConsoleApiCalled = match serde_json::from_value(params) {
			Ok(event) => event,
			Err(err) => {
				debug!(target = "broker.net", error = %err, "malformed console event, skipping");
				return;
			}
		};
		let message = event
			.args
			.iter()
			.map(render_argument)
			.collect::<Vec<_>>()
			.join(" ");
		self.console.lock().push(ConsoleEntry {
			timestamp_ms: event_timestamp_ms(event.timestamp),
			level: normalize_level(&event.kind),
			message,
		});
	}

	fn on_log_entry(&self, params: Value) {
		let event: LogEntryAdded = match serde_json::from_value(params) {
			Ok(event) => event,
			Err(err) => {
				debug!(target = "broker.net", error = %err, "malformed log entry, skipping");
				return;
			}
		};
		self.console.lock().push(ConsoleEntry {
			timestamp_ms: event_timestamp_ms(event.entry.timestamp),
			level: normalize_level(&event.entry.level),
			message: event.entry.text,
		});
	}

	fn on_request_started(&self, params: Value) {
		let event: RequestWillBeSent = match serde_json::from_value(params) {
			Ok(event) => event,
			Err(err) => {
				debug!(target = "broker.net", error = %err, "malformed request event, skipping");
				return;
			}
		};
		self.pending.lock().insert(
			event.request_id,
			PendingRequest {
				url: event.request.url,
				method: event.request.method,
				started: event.timestamp,
			},
		);
	}

	fn on_response(&self, params: Value) {
		let event: ResponseReceived = match serde_json::from_value(params) {
			Ok(event) => event,
			Err(err) => {
				debug!(target = "broker.net", error = %err, "malformed response event, skipping");
				return;
			}
		};
		self.finish_request(
			&event.request_id,
			Some(event.response.status),
			None,
			event.timestamp,
		);
	}

	fn on_failure(&self, params: Value) {
		let event: LoadingFailed = match serde_json::from_value(params) {
			Ok(event) => event,
			Err(err) => {
				debug!(target = "broker.net", error = %err, "malformed failure event, skipping");
				return;
			}
		};
		self.finish_request(
			&event.request_id,
			None,
			Some(event.error_text),
			event.timestamp,
		);
	}

	/// Emit the network entry for whichever terminal event arrives first.
	/// A terminal with no matching pending request (evicted, or a duplicate
	/// terminal) is dropped silently.
	fn finish_request(
		&self,
		request_id: &str,
		status: Option<i64>,
		error: Option<String>,
		terminal_ts: f64,
	) {
		let Some(pending) = self.pending.lock().take(request_id) else {
			trace!(target = "broker.net", request_id, "terminal event with no pending request");
			return;
		};
		self.network.lock().push(NetworkEntry {
			request_id: request_id.to_string(),
			url: pending.url,
			method: pending.method,
			status,
			elapsed_ms: round2((terminal_ts - pending.started) * 1000.0),
			error,
			timestamp_ms: now_ms(),
		});
	}
}

/// Consume the session's event stream until it ends, then report the
/// disconnect exactly once.
pub(crate) async fn run_ingestion(
	mut events: mpsc::UnboundedReceiver<EventFrame>,
	buffers: Arc<EventBuffers>,
	on_disconnect: impl FnOnce() + Send + 'static,
) {
	while let Some(frame) = events.recv().await {
		buffers.ingest(&frame.method, frame.params);
	}
	debug!(target = "broker.net", "event stream ended");
	on_disconnect();
}

/// Render one console argument defensively: every payload shape has an
/// explicit arm, and anything unrecognized becomes a placeholder instead of
/// an error.
fn render_argument(object: &RemoteObject) -> String {
	match object.shape() {
		ObjectShape::Primitive(Value::String(text)) => text.clone(),
		ObjectShape::Primitive(value) => value.to_string(),
		ObjectShape::Undefined => "undefined".to_string(),
		ObjectShape::Unserializable(raw) => raw.to_string(),
		ObjectShape::DescriptionOnly(description) => description.to_string(),
		ObjectShape::Opaque(kind) => {
			if kind.is_empty() {
				"[unknown value]".to_string()
			} else {
				format!("[{kind}]")
			}
		}
	}
}

fn normalize_level(raw: &str) -> String {
	match raw {
		"warning" => "warn".to_string(),
		"" => "log".to_string(),
		other => other.to_string(),
	}
}

/// Console and log events carry their own epoch-ms timestamp; fall back to
/// ingestion time when a payload omits it.
fn event_timestamp_ms(raw: f64) -> u64 {
	if raw > 0.0 { raw as u64 } else { now_ms() }
}

fn round2(value: f64) -> f64 {
	(value * 100.0).round() / 100.0
}

pub(crate) fn now_ms() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn buffers() -> EventBuffers {
		EventBuffers::new(10, 10)
	}

	fn start_request(buffers: &EventBuffers, id: &str, ts: f64) {
		buffers.ingest(
			"Network.requestWillBeSent",
			json!({
				"requestId": id,
				"request": {"url": "http://localhost:3000/api", "method": "GET"},
				"timestamp": ts
			}),
		);
	}

	#[test]
	fn console_arguments_render_by_shape() {
		let buffers = buffers();
		buffers.ingest(
			"Runtime.consoleAPICalled",
			json!({
				"type": "log",
				"args": [
					{"type": "string", "value": "count:"},
					{"type": "number", "value": 3},
					{"type": "undefined"},
					{"type": "number", "unserializableValue": "NaN"},
					{"type": "object", "description": "Object"},
					{"type": "symbol"}
				]
			}),
		);
		let entries = buffers.console(false);
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].level, "log");
		assert_eq!(entries[0].message, "count: 3 undefined NaN Object [symbol]");
	}

	#[test]
	fn warning_level_is_normalized() {
		let buffers = buffers();
		buffers.ingest(
			"Runtime.consoleAPICalled",
			json!({"type": "warning", "args": [{"type": "string", "value": "careful"}]}),
		);
		assert_eq!(buffers.console(false)[0].level, "warn");
	}

	#[test]
	fn console_entries_carry_the_event_timestamp() {
		let buffers = buffers();
		buffers.ingest(
			"Runtime.consoleAPICalled",
			json!({
				"type": "log",
				"args": [{"type": "string", "value": "x"}],
				"timestamp": 1_724_500_000_123.0
			}),
		);
		buffers.ingest(
			"Log.entryAdded",
			json!({"entry": {"level": "info", "text": "y", "timestamp": 1_724_500_000_456.0}}),
		);
		let entries = buffers.console(false);
		assert_eq!(entries[0].timestamp_ms, 1_724_500_000_123);
		assert_eq!(entries[1].timestamp_ms, 1_724_500_000_456);
	}

	#[test]
	fn missing_event_timestamp_falls_back_to_ingestion_time() {
		let buffers = buffers();
		buffers.ingest("Log.entryAdded", json!({"entry": {"level": "info", "text": "y"}}));
		assert!(buffers.console(false)[0].timestamp_ms > 0);
	}

	#[test]
	fn browser_log_entries_land_in_console_buffer() {
		let buffers = buffers();
		buffers.ingest(
			"Log.entryAdded",
			json!({"entry": {"level": "error", "text": "mixed content blocked"}}),
		);
		let entries = buffers.console(false);
		assert_eq!(entries[0].level, "error");
		assert_eq!(entries[0].message, "mixed content blocked");
	}

	#[test]
	fn malformed_event_is_swallowed() {
		let buffers = buffers();
		buffers.ingest("Runtime.consoleAPICalled", json!("not an object"));
		buffers.ingest("Network.responseReceived", json!({"nonsense": true}));
		assert!(buffers.console(false).is_empty());
		assert!(buffers.network(false).is_empty());
	}

	#[test]
	fn response_completes_a_pending_request() {
		let buffers = buffers();
		start_request(&buffers, "r1", 10.0);
		buffers.ingest(
			"Network.responseReceived",
			json!({"requestId": "r1", "response": {"status": 200}, "timestamp": 10.25}),
		);
		let entries = buffers.network(false);
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].status, Some(200));
		assert_eq!(entries[0].elapsed_ms, 250.0);
		assert!(entries[0].error.is_none());
	}

	#[test]
	fn elapsed_rounds_to_two_decimals() {
		let buffers = buffers();
		start_request(&buffers, "r1", 1.0);
		buffers.ingest(
			"Network.responseReceived",
			json!({"requestId": "r1", "response": {"status": 204}, "timestamp": 1.0012345}),
		);
		assert_eq!(buffers.network(false)[0].elapsed_ms, 1.23);
	}

	#[test]
	fn double_terminal_emits_exactly_one_entry() {
		let buffers = buffers();
		start_request(&buffers, "r1", 5.0);
		buffers.ingest(
			"Network.responseReceived",
			json!({"requestId": "r1", "response": {"status": 500}, "timestamp": 5.5}),
		);
		buffers.ingest(
			"Network.loadingFailed",
			json!({"requestId": "r1", "errorText": "net::ERR_FAILED", "timestamp": 5.6}),
		);
		let entries = buffers.network(false);
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].status, Some(500));
	}

	#[test]
	fn failure_first_also_wins() {
		let buffers = buffers();
		start_request(&buffers, "r2", 5.0);
		buffers.ingest(
			"Network.loadingFailed",
			json!({"requestId": "r2", "errorText": "net::ERR_ABORTED", "timestamp": 5.1}),
		);
		buffers.ingest(
			"Network.responseReceived",
			json!({"requestId": "r2", "response": {"status": 200}, "timestamp": 5.2}),
		);
		let entries = buffers.network(false);
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].error.as_deref(), Some("net::ERR_ABORTED"));
		assert!(entries[0].status.is_none());
	}

	#[test]
	fn unmatched_terminal_is_dropped() {
		let buffers = buffers();
		buffers.ingest(
			"Network.responseReceived",
			json!({"requestId": "ghost", "response": {"status": 200}, "timestamp": 1.0}),
		);
		assert!(buffers.network(false).is_empty());
	}

	#[test]
	fn pending_map_evicts_oldest() {
		let mut pending = PendingMap::new(2);
		for (id, ts) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
			pending.insert(
				id.to_string(),
				PendingRequest {
					url: String::new(),
					method: String::new(),
					started: ts,
				},
			);
		}
		assert!(pending.take("a").is_none(), "oldest should have been evicted");
		assert!(pending.take("b").is_some());
		assert!(pending.take("c").is_some());
	}

	#[test]
	fn clear_pending_drops_shadow_state() {
		let buffers = buffers();
		start_request(&buffers, "r1", 1.0);
		buffers.clear_pending();
		buffers.ingest(
			"Network.responseReceived",
			json!({"requestId": "r1", "response": {"status": 200}, "timestamp": 2.0}),
		);
		assert!(buffers.network(false).is_empty());
	}

	#[tokio::test]
	async fn ingestion_task_reports_disconnect_once() {
		let buffers = Arc::new(EventBuffers::new(4, 4));
		let (tx, rx) = mpsc::unbounded_channel();
		let (done_tx, done_rx) = tokio::sync::oneshot::channel();

		let handle = tokio::spawn(run_ingestion(rx, Arc::clone(&buffers), move || {
			let _ = done_tx.send(());
		}));

		tx.send(EventFrame {
			method: "Log.entryAdded".to_string(),
			params: json!({"entry": {"level": "info", "text": "hello"}}),
		})
		.unwrap();
		drop(tx);

		done_rx.await.expect("disconnect callback should fire");
		handle.await.unwrap();
		assert_eq!(buffers.console(false).len(), 1);
	}
}
