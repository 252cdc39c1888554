//! WebSocket transport for one DevTools session.
//!
//! A single read task routes incoming frames: replies (frames with an `id`)
//! resolve the matching pending-command waiter; events (frames with a
//! `method`) are pushed into the ingestion channel. When the socket closes
//! the read task drops the event sender, and that drop is the disconnect
//! signal the rest of the system observes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use cdp_protocol::{CommandFrame, EventFrame, IncomingFrame};

use crate::error::{BrokerError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = DashMap<u64, oneshot::Sender<Result<Value>>>;

pub struct Transport {
	next_id: AtomicU64,
	pending: Arc<PendingMap>,
	writer: tokio::sync::Mutex<WsSink>,
	closed: Arc<AtomicBool>,
}

impl Transport {
	/// Connect within a bounded deadline. `event_tx` receives every
	/// asynchronous event; its closure marks the end of the session.
	pub async fn connect(
		ws_url: &str,
		event_tx: mpsc::UnboundedSender<EventFrame>,
	) -> Result<Arc<Self>> {
		let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(ws_url));
		let (stream, _) = connect
			.await
			.map_err(|_| {
				BrokerError::Unreachable(format!(
					"timed out connecting to {ws_url} after {}s",
					CONNECT_TIMEOUT.as_secs()
				))
			})?
			.map_err(|err| BrokerError::Unreachable(format!("{ws_url}: {err}")))?;

		let (sink, source) = stream.split();
		let pending: Arc<PendingMap> = Arc::new(DashMap::new());
		let closed = Arc::new(AtomicBool::new(false));

		tokio::spawn(read_loop(
			source,
			Arc::clone(&pending),
			event_tx,
			Arc::clone(&closed),
		));

		Ok(Arc::new(Self {
			next_id: AtomicU64::new(0),
			pending,
			writer: tokio::sync::Mutex::new(sink),
			closed,
		}))
	}

	pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
		self.send_with_timeout(method, params, COMMAND_TIMEOUT).await
	}

	pub async fn send_with_timeout(
		&self,
		method: &str,
		params: Value,
		deadline: Duration,
	) -> Result<Value> {
		if self.is_closed() {
			return Err(BrokerError::Transport("connection closed".to_string()));
		}

		let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
		let (tx, rx) = oneshot::channel();
		self.pending.insert(id, tx);

		let frame = CommandFrame { id, method, params };
		let text = serde_json::to_string(&frame)
			.map_err(|err| BrokerError::Protocol(format!("cannot encode {method}: {err}")))?;

		{
			let mut writer = self.writer.lock().await;
			if let Err(err) = writer.send(Message::Text(text)).await {
				self.pending.remove(&id);
				return Err(BrokerError::Transport(format!("send of {method} failed: {err}")));
			}
		}

		match tokio::time::timeout(deadline, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(BrokerError::Transport(format!(
				"connection closed before reply to {method}"
			))),
			Err(_) => {
				self.pending.remove(&id);
				Err(BrokerError::Transport(format!(
					"no reply to {method} within {}s",
					deadline.as_secs()
				)))
			}
		}
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	pub async fn close(&self) {
		self.closed.store(true, Ordering::Release);
		let mut writer = self.writer.lock().await;
		let _ = writer.send(Message::Close(None)).await;
	}
}

async fn read_loop(
	mut source: WsSource,
	pending: Arc<PendingMap>,
	event_tx: mpsc::UnboundedSender<EventFrame>,
	closed: Arc<AtomicBool>,
) {
	while let Some(message) = source.next().await {
		match message {
			Ok(Message::Text(text)) => route_frame(&text, &pending, &event_tx),
			Ok(Message::Close(_)) => {
				debug!(target = "broker.transport", "peer closed connection");
				break;
			}
			Ok(_) => {}
			Err(err) => {
				warn!(target = "broker.transport", error = %err, "read failed, dropping connection");
				break;
			}
		}
	}

	closed.store(true, Ordering::Release);

	// Fail every caller still waiting on a reply.
	let waiting: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
	for id in waiting {
		if let Some((_, tx)) = pending.remove(&id) {
			let _ = tx.send(Err(BrokerError::Transport(
				"connection closed while awaiting reply".to_string(),
			)));
		}
	}
	// event_tx drops here; the ingestion task sees the channel end.
}

fn route_frame(
	text: &str,
	pending: &PendingMap,
	event_tx: &mpsc::UnboundedSender<EventFrame>,
) {
	let frame: IncomingFrame = match serde_json::from_str(text) {
		Ok(frame) => frame,
		Err(err) => {
			debug!(target = "broker.transport", error = %err, "unparseable frame, skipping");
			return;
		}
	};

	if let Some(id) = frame.id {
		let Some((_, tx)) = pending.remove(&id) else {
			debug!(target = "broker.transport", id, "reply with no waiter");
			return;
		};
		let result = match frame.error {
			Some(err) => Err(BrokerError::Protocol(err.to_string())),
			None => Ok(frame.result.unwrap_or(Value::Null)),
		};
		let _ = tx.send(result);
	} else if let Some(method) = frame.method {
		// A dropped receiver just means the session is being torn down.
		let _ = event_tx.send(EventFrame {
			method,
			params: frame.params.unwrap_or(Value::Null),
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn pending_with_waiter(id: u64) -> (PendingMap, oneshot::Receiver<Result<Value>>) {
		let pending = DashMap::new();
		let (tx, rx) = oneshot::channel();
		pending.insert(id, tx);
		(pending, rx)
	}

	#[tokio::test]
	async fn routes_reply_to_waiter() {
		let (pending, rx) = pending_with_waiter(4);
		let (event_tx, _event_rx) = mpsc::unbounded_channel();

		route_frame(r#"{"id":4,"result":{"ok":true}}"#, &pending, &event_tx);
		let value = rx.await.unwrap().unwrap();
		assert_eq!(value, json!({"ok": true}));
		assert!(pending.is_empty());
	}

	#[tokio::test]
	async fn routes_error_reply_as_protocol_error() {
		let (pending, rx) = pending_with_waiter(9);
		let (event_tx, _event_rx) = mpsc::unbounded_channel();

		route_frame(
			r#"{"id":9,"error":{"code":-32000,"message":"target closed"}}"#,
			&pending,
			&event_tx,
		);
		match rx.await.unwrap() {
			Err(BrokerError::Protocol(message)) => assert!(message.contains("target closed")),
			other => panic!("expected protocol error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn routes_event_to_channel() {
		let pending = DashMap::new();
		let (event_tx, mut event_rx) = mpsc::unbounded_channel();

		route_frame(
			r#"{"method":"Log.entryAdded","params":{"entry":{"level":"error","text":"boom"}}}"#,
			&pending,
			&event_tx,
		);
		let event = event_rx.recv().await.unwrap();
		assert_eq!(event.method, "Log.entryAdded");
		assert_eq!(event.params["entry"]["text"], "boom");
	}

	#[tokio::test]
	async fn malformed_frames_are_skipped() {
		let (pending, mut rx) = pending_with_waiter(1);
		let (event_tx, mut event_rx) = mpsc::unbounded_channel();

		route_frame("not json at all", &pending, &event_tx);
		assert!(rx.try_recv().is_err());
		assert!(event_rx.try_recv().is_err());
		assert_eq!(pending.len(), 1);
	}

	#[tokio::test]
	async fn connect_to_unreachable_address_is_bounded() {
		let (event_tx, _event_rx) = mpsc::unbounded_channel();
		// Bind then drop to get a port with nothing listening.
		let port = {
			let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
			listener.local_addr().unwrap().port()
		};
		let result =
			Transport::connect(&format!("ws://127.0.0.1:{port}/devtools/page/X"), event_tx).await;
		assert!(matches!(result, Err(BrokerError::Unreachable(_))));
	}
}
