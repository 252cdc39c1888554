//! Host-platform process helpers.
//!
//! The rest of the broker only ever calls these three capabilities: kill a
//! whole process tree, check a pid for liveness, and look up a pid's
//! executable name. Single-signal termination is not enough here: both the
//! launched browser and supervised dev servers fork children, and leaving
//! grandchildren running is the dominant leak hazard in this system.

#[cfg(any(windows, all(unix, not(target_os = "linux"))))]
use std::process::Command;

use tracing::{debug, warn};

/// Terminate `pid` and everything below it.
///
/// On unix, children are spawned into their own process group (pgid == pid),
/// so the group signal reaches the whole tree; a plain `kill` is the
/// fallback for processes that moved themselves out of the group.
pub fn terminate_process_tree(pid: u32) {
	debug!(target = "broker.platform", pid, "terminating process tree");

	#[cfg(unix)]
	{
		let killed_group = unsafe { libc::killpg(pid as i32, libc::SIGKILL) } == 0;
		if !killed_group {
			let killed = unsafe { libc::kill(pid as i32, libc::SIGKILL) } == 0;
			if !killed {
				warn!(target = "broker.platform", pid, "kill failed; process may already be gone");
			}
		}
	}

	#[cfg(windows)]
	{
		let status = Command::new("taskkill")
			.args(["/T", "/F", "/PID", &pid.to_string()])
			.output();
		if let Err(err) = status {
			warn!(target = "broker.platform", pid, error = %err, "taskkill failed");
		}
	}
}

/// Whether a process with this pid currently exists.
pub fn process_alive(pid: u32) -> bool {
	#[cfg(unix)]
	{
		if unsafe { libc::kill(pid as i32, 0) } == 0 {
			return true;
		}
		// EPERM means the process exists but belongs to someone else.
		std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
	}

	#[cfg(windows)]
	{
		process_name(pid).is_some()
	}
}

/// Executable base name for a pid, if it can be determined.
///
/// Used by the orphan sweep to make sure a recorded pid still refers to the
/// process we launched; pids get recycled, and killing blind is forbidden.
pub fn process_name(pid: u32) -> Option<String> {
	#[cfg(target_os = "linux")]
	{
		std::fs::read_to_string(format!("/proc/{pid}/comm"))
			.ok()
			.map(|name| name.trim().to_string())
			.filter(|name| !name.is_empty())
	}

	#[cfg(all(unix, not(target_os = "linux")))]
	{
		let output = Command::new("ps")
			.args(["-p", &pid.to_string(), "-o", "comm="])
			.output()
			.ok()?;
		if !output.status.success() {
			return None;
		}
		let raw = String::from_utf8_lossy(&output.stdout);
		let name = raw.trim();
		if name.is_empty() {
			return None;
		}
		// ps reports a full path on some platforms.
		Some(
			name.rsplit('/')
				.next()
				.unwrap_or(name)
				.to_string(),
		)
	}

	#[cfg(windows)]
	{
		let output = Command::new("tasklist")
			.args(["/FO", "CSV", "/NH", "/FI", &format!("PID eq {pid}")])
			.output()
			.ok()?;
		let raw = String::from_utf8_lossy(&output.stdout);
		let line = raw.lines().next()?;
		let name = line.split(',').next()?.trim_matches('"');
		if name.is_empty() || name.starts_with("INFO:") {
			return None;
		}
		Some(name.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn own_process_is_alive_and_named() {
		let pid = std::process::id();
		assert!(process_alive(pid));
		let name = process_name(pid).expect("own process should have a name");
		assert!(!name.is_empty());
	}

	#[test]
	fn bogus_pid_is_not_alive() {
		// Beyond any realistic pid range on test hosts.
		assert!(!process_alive(4_000_000));
		assert!(process_name(4_000_000).is_none());
	}

	#[cfg(unix)]
	#[test]
	fn tree_kill_takes_down_a_process_group() {
		use std::os::unix::process::CommandExt;
		use std::process::Command;

		let mut child = {
			let mut cmd = Command::new("sleep");
			cmd.arg("30");
			cmd.process_group(0);
			cmd.spawn().unwrap()
		};
		let pid = child.id();
		assert!(process_alive(pid));

		terminate_process_tree(pid);
		let status = child.wait().unwrap();
		assert!(!status.success());
	}
}
