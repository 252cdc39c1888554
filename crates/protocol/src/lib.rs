//! Wire types for the Chrome DevTools Protocol surface used by `cdp-broker`.
//!
//! This crate is pure data: serde definitions for the HTTP discovery
//! endpoints (`/json/list`, `/json/version`), the WebSocket command/response
//! envelopes, and the asynchronous event payloads the broker ingests
//! (console, browser log, network lifecycle). No I/O lives here.

mod events;
mod message;
mod target;

pub use events::{
	ConsoleApiCalled, LoadingFailed, LogEntry, LogEntryAdded, ObjectShape, RemoteObject,
	RequestInfo, RequestWillBeSent, ResponseInfo, ResponseReceived,
};
pub use message::{CommandFrame, EventFrame, IncomingFrame, ProtocolError};
pub use target::{TargetInfo, VersionInfo};
