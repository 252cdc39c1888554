//! Supervisor for named auxiliary processes (dev servers).
//!
//! Each managed process is keyed by a caller-chosen id, captures combined
//! stdout/stderr into its own ring buffer, and stays queryable after exit.
//! Records are never removed automatically; a finished id can be reused by
//! a later `start`, which replaces the dead record.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, Result};
use crate::events::now_ms;
use crate::platform;
use crate::ring::RingBuffer;

/// Which stream a captured line came from. `System` marks lines the
/// supervisor itself wrote, such as spawn failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
	Stdout,
	Stderr,
	System,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
	pub stream: LogStream,
	pub timestamp_ms: u64,
	pub line: String,
}

/// Snapshot of one managed process for `list`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
	pub id: String,
	pub command_line: String,
	pub running: bool,
	pub pid: Option<u32>,
	pub started_at_ms: u64,
	pub exit_code: Option<i32>,
}

/// Result of `get_logs`: captured lines plus current lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessLogs {
	pub id: String,
	pub running: bool,
	pub exit_code: Option<i32>,
	pub lines: Vec<LogLine>,
}

struct LifecycleState {
	running: bool,
	exit_code: Option<i32>,
}

struct ProcessRecord {
	id: String,
	command_line: String,
	pid: Option<u32>,
	started_at_ms: u64,
	state: Mutex<LifecycleState>,
	logs: Mutex<RingBuffer<LogLine>>,
}

impl ProcessRecord {
	fn push_line(&self, stream: LogStream, line: String) {
		self.logs.lock().push(LogLine {
			stream,
			timestamp_ms: now_ms(),
			line,
		});
	}

	fn status(&self) -> ProcessStatus {
		let state = self.state.lock();
		ProcessStatus {
			id: self.id.clone(),
			command_line: self.command_line.clone(),
			running: state.running,
			pid: self.pid,
			started_at_ms: self.started_at_ms,
			exit_code: state.exit_code,
		}
	}
}

pub struct ProcessSupervisor {
	table: DashMap<String, Arc<ProcessRecord>>,
	log_capacity: usize,
}

impl ProcessSupervisor {
	pub fn new(log_capacity: usize) -> Self {
		Self {
			table: DashMap::new(),
			log_capacity,
		}
	}

	/// Spawn a named process. Fails with `Conflict` if `id` is still
	/// running; a record left by an exited process is replaced. Spawn
	/// failures are recorded on the record asynchronously rather than
	/// returned, so a bad command still produces a queryable entry.
	pub fn start(
		&self,
		id: &str,
		command: &str,
		args: &[String],
		cwd: Option<&Path>,
		env: &[(String, String)],
	) -> Result<ProcessStatus> {
		match self.table.entry(id.to_string()) {
			Entry::Occupied(mut occupied) => {
				if occupied.get().state.lock().running {
					return Err(BrokerError::Conflict(id.to_string()));
				}
				debug!(target = "broker.supervisor", id, "replacing exited record");
				let record = self.spawn_record(id, command, args, cwd, env);
				let status = record.status();
				occupied.insert(record);
				Ok(status)
			}
			Entry::Vacant(vacant) => {
				let record = self.spawn_record(id, command, args, cwd, env);
				let status = record.status();
				vacant.insert(record);
				Ok(status)
			}
		}
	}

	/// Captured output plus lifecycle state. `clear` drains the buffer.
	pub fn get_logs(&self, id: &str, clear: bool) -> Result<ProcessLogs> {
		let record = self
			.table
			.get(id)
			.ok_or_else(|| BrokerError::NotFound(id.to_string()))?;
		let lines = {
			let mut logs = record.logs.lock();
			if clear { logs.drain() } else { logs.peek() }
		};
		let state = record.state.lock();
		Ok(ProcessLogs {
			id: record.id.clone(),
			running: state.running,
			exit_code: state.exit_code,
			lines,
		})
	}

	/// Terminate the whole process tree rooted at `id`. Success means the
	/// termination signal was issued; exit is observed asynchronously by
	/// the wait task. A process that already exited is a no-op success.
	pub fn stop(&self, id: &str) -> Result<()> {
		let record = self
			.table
			.get(id)
			.ok_or_else(|| BrokerError::NotFound(id.to_string()))?;
		if !record.state.lock().running {
			return Ok(());
		}
		if let Some(pid) = record.pid {
			info!(target = "broker.supervisor", id, pid, "stopping process tree");
			platform::terminate_process_tree(pid);
		}
		Ok(())
	}

	pub fn list(&self) -> Vec<ProcessStatus> {
		let mut statuses: Vec<ProcessStatus> =
			self.table.iter().map(|entry| entry.value().status()).collect();
		statuses.sort_by(|a, b| a.id.cmp(&b.id));
		statuses
	}

	fn spawn_record(
		&self,
		id: &str,
		command: &str,
		args: &[String],
		cwd: Option<&Path>,
		env: &[(String, String)],
	) -> Arc<ProcessRecord> {
		let command_line = render_command_line(command, args);

		let mut cmd = Command::new(command);
		cmd.args(args)
			.stdin(std::process::Stdio::null())
			.stdout(std::process::Stdio::piped())
			.stderr(std::process::Stdio::piped());
		if let Some(dir) = cwd {
			cmd.current_dir(dir);
		}
		for (key, value) in env {
			cmd.env(key, value);
		}
		// Own group so stop() can take out shells and their children.
		#[cfg(unix)]
		cmd.process_group(0);

		match cmd.spawn() {
			Ok(mut child) => {
				let record = Arc::new(ProcessRecord {
					id: id.to_string(),
					command_line,
					pid: child.id(),
					started_at_ms: now_ms(),
					state: Mutex::new(LifecycleState {
						running: true,
						exit_code: None,
					}),
					logs: Mutex::new(RingBuffer::new(self.log_capacity)),
				});
				info!(
					target = "broker.supervisor",
					id,
					pid = record.pid,
					command = %record.command_line,
					"process started"
				);

				if let Some(stdout) = child.stdout.take() {
					tokio::spawn(capture_lines(Arc::clone(&record), LogStream::Stdout, stdout));
				}
				if let Some(stderr) = child.stderr.take() {
					tokio::spawn(capture_lines(Arc::clone(&record), LogStream::Stderr, stderr));
				}
				tokio::spawn(observe_exit(Arc::clone(&record), child));

				record
			}
			Err(err) => {
				warn!(target = "broker.supervisor", id, error = %err, "spawn failed");
				let record = Arc::new(ProcessRecord {
					id: id.to_string(),
					command_line,
					pid: None,
					started_at_ms: now_ms(),
					state: Mutex::new(LifecycleState {
						running: false,
						exit_code: Some(-1),
					}),
					logs: Mutex::new(RingBuffer::new(self.log_capacity)),
				});
				record.push_line(LogStream::System, format!("spawn failed: {err}"));
				record
			}
		}
	}
}

async fn capture_lines<R>(record: Arc<ProcessRecord>, stream: LogStream, source: R)
where
	R: AsyncRead + Unpin,
{
	let mut lines = BufReader::new(source).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) => record.push_line(stream, line),
			Ok(None) => break,
			Err(err) => {
				debug!(
					target = "broker.supervisor",
					id = %record.id,
					error = %err,
					"log capture ended"
				);
				break;
			}
		}
	}
}

async fn observe_exit(record: Arc<ProcessRecord>, mut child: tokio::process::Child) {
	let exit_code = match child.wait().await {
		Ok(status) => status.code(),
		Err(err) => {
			warn!(target = "broker.supervisor", id = %record.id, error = %err, "wait failed");
			None
		}
	};
	let mut state = record.state.lock();
	state.running = false;
	state.exit_code = exit_code;
	info!(
		target = "broker.supervisor",
		id = %record.id,
		exit_code,
		"process exited"
	);
}

fn render_command_line(command: &str, args: &[String]) -> String {
	let mut rendered = String::from(command);
	for arg in args {
		rendered.push(' ');
		if arg.contains(' ') {
			rendered.push('"');
			rendered.push_str(arg);
			rendered.push('"');
		} else {
			rendered.push_str(arg);
		}
	}
	rendered
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	async fn wait_until_exited(supervisor: &ProcessSupervisor, id: &str) {
		for _ in 0..100 {
			let logs = supervisor.get_logs(id, false).unwrap();
			if !logs.running {
				return;
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		panic!("process '{id}' did not exit in time");
	}

	// Output capture runs on its own task, so a line can land just after
	// the exit is observed; poll for it instead of asserting immediately.
	async fn wait_for_line(supervisor: &ProcessSupervisor, id: &str, needle: &str) {
		for _ in 0..100 {
			let logs = supervisor.get_logs(id, false).unwrap();
			if logs.lines.iter().any(|line| line.line.contains(needle)) {
				return;
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		panic!("no captured line containing '{needle}' for '{id}'");
	}

	#[tokio::test]
	async fn echo_output_is_captured_and_drained() {
		let supervisor = ProcessSupervisor::new(100);
		supervisor
			.start("echo", "echo", &["hello".to_string()], None, &[])
			.unwrap();
		wait_until_exited(&supervisor, "echo").await;
		wait_for_line(&supervisor, "echo", "hello").await;

		let logs = supervisor.get_logs("echo", true).unwrap();
		assert!(!logs.running);
		assert_eq!(logs.exit_code, Some(0));
		assert_eq!(logs.lines.len(), 1);
		assert_eq!(logs.lines[0].stream, LogStream::Stdout);
		assert!(logs.lines[0].line.contains("hello"));

		// Drain emptied the buffer; state is still queryable.
		let again = supervisor.get_logs("echo", true).unwrap();
		assert!(again.lines.is_empty());
		assert!(!again.running);
	}

	#[tokio::test]
	async fn duplicate_running_id_is_a_conflict() {
		let supervisor = ProcessSupervisor::new(100);
		supervisor
			.start("sleeper", "sleep", &["30".to_string()], None, &[])
			.unwrap();

		let second = supervisor.start("sleeper", "sleep", &["30".to_string()], None, &[]);
		assert!(matches!(second, Err(BrokerError::Conflict(_))), "{second:?}");

		supervisor.stop("sleeper").unwrap();
		wait_until_exited(&supervisor, "sleeper").await;
	}

	#[tokio::test]
	async fn exited_id_can_be_started_again() {
		let supervisor = ProcessSupervisor::new(100);
		supervisor
			.start("job", "echo", &["first".to_string()], None, &[])
			.unwrap();
		wait_until_exited(&supervisor, "job").await;

		let status = supervisor
			.start("job", "echo", &["second".to_string()], None, &[])
			.unwrap();
		assert!(status.running);
		wait_until_exited(&supervisor, "job").await;
		wait_for_line(&supervisor, "job", "second").await;

		let logs = supervisor.get_logs("job", false).unwrap();
		// Restart replaced the record, so only the second run's output is here.
		assert!(logs.lines.iter().any(|line| line.line.contains("second")));
		assert!(!logs.lines.iter().any(|line| line.line.contains("first")));
	}

	#[tokio::test]
	async fn stop_after_exit_is_a_no_op_success() {
		let supervisor = ProcessSupervisor::new(100);
		supervisor
			.start("quick", "echo", &["done".to_string()], None, &[])
			.unwrap();
		wait_until_exited(&supervisor, "quick").await;

		assert!(supervisor.stop("quick").is_ok());
	}

	#[tokio::test]
	async fn unknown_id_is_not_found() {
		let supervisor = ProcessSupervisor::new(100);
		assert!(matches!(
			supervisor.get_logs("ghost", false),
			Err(BrokerError::NotFound(_))
		));
		assert!(matches!(
			supervisor.stop("ghost"),
			Err(BrokerError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn spawn_failure_is_recorded_not_raised() {
		let supervisor = ProcessSupervisor::new(100);
		let status = supervisor
			.start("bogus", "/nonexistent/definitely-not-a-command", &[], None, &[])
			.unwrap();
		assert!(!status.running);
		assert_eq!(status.pid, None);

		let logs = supervisor.get_logs("bogus", false).unwrap();
		assert_eq!(logs.exit_code, Some(-1));
		assert!(logs.lines.iter().any(|line| {
			line.stream == LogStream::System && line.line.contains("spawn failed")
		}));
	}

	#[tokio::test]
	async fn list_snapshots_every_record() {
		let supervisor = ProcessSupervisor::new(100);
		supervisor
			.start("a", "echo", &["a".to_string()], None, &[])
			.unwrap();
		supervisor
			.start("b", "echo", &["b".to_string()], None, &[])
			.unwrap();
		wait_until_exited(&supervisor, "a").await;
		wait_until_exited(&supervisor, "b").await;

		let statuses = supervisor.list();
		assert_eq!(statuses.len(), 2);
		assert_eq!(statuses[0].id, "a");
		assert_eq!(statuses[1].id, "b");
		assert!(statuses.iter().all(|status| !status.running));
	}

	#[test]
	fn command_line_rendering_quotes_spaced_args() {
		let rendered = render_command_line(
			"npm",
			&["run".to_string(), "dev server".to_string()],
		);
		assert_eq!(rendered, r#"npm run "dev server""#);
	}
}
