//! Resilient connection broker for a remotely debuggable browser, plus a
//! supervisor for auxiliary long-lived child processes.
//!
//! The [`ConnectionManager`] owns the single active DevTools session:
//! discovery, connect, liveness verification, lazy reconnect, optional
//! auto-launch, and cross-run orphan cleanup via an on-disk PID marker.
//! Event ingestion runs in the background against the live session and
//! fills bounded ring buffers with console and network entries. The
//! [`ProcessSupervisor`] manages named dev-server processes independently
//! of the browser session.

pub mod config;
pub mod discovery;
pub mod error;
mod events;
pub mod launcher;
mod manager;
pub mod platform;
pub mod ring;
mod session;
pub mod supervisor;
mod transport;

pub use cdp_protocol::VersionInfo;
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use events::{ConsoleEntry, NetworkEntry};
pub use launcher::sweep_orphan;
pub use manager::ConnectionManager;
pub use ring::RingBuffer;
pub use session::Session;
pub use supervisor::{LogLine, LogStream, ProcessLogs, ProcessStatus, ProcessSupervisor};
