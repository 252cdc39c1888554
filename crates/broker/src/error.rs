use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Error taxonomy for the broker core.
///
/// Variants carry rendered strings rather than source errors so the whole
/// enum is `Clone`: the result of a single shared connect attempt is handed
/// to every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
	/// No discovery or launch strategy could reach the debugging endpoint.
	#[error("debugging endpoint unreachable: {0}")]
	Unreachable(String),

	/// Liveness probe on an existing session failed; triggers reconnect.
	#[error("session stale: {0}")]
	Stale(String),

	/// Executable missing, spawn rejected, or readiness deadline exceeded.
	#[error("browser launch failed: {0}")]
	LaunchFailed(String),

	/// A managed process with this id is already running.
	#[error("process id already running: {0}")]
	Conflict(String),

	/// Operation against an unknown managed process id.
	#[error("no such process id: {0}")]
	NotFound(String),

	/// Wire-level failure on an established connection.
	#[error("transport error: {0}")]
	Transport(String),

	/// The endpoint answered, but with something malformed or an error object.
	#[error("protocol error: {0}")]
	Protocol(String),

	/// The manager has been shut down; the state is absorbing.
	#[error("connection manager is shut down")]
	ShutDown,
}
