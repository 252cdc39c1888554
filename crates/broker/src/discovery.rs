//! Browser executable discovery.
//!
//! Locates a Chrome/Chromium binary using, in order: the explicit config
//! override, platform well-known install locations, then a PATH lookup.
//! Returns `None` rather than erroring; a missing browser is only fatal
//! when auto-launch is actually needed, and that call site decides.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, warn};

use crate::config::BrokerConfig;

/// Candidate executable names for the PATH lookup.
const PATH_CANDIDATES: &[&str] = &[
	"google-chrome",
	"google-chrome-stable",
	"chromium",
	"chromium-browser",
	"chrome",
];

pub fn find_browser(config: &BrokerConfig) -> Option<PathBuf> {
	if let Some(path) = &config.executable {
		if path.exists() {
			debug!(target = "broker.launch", path = %path.display(), "using configured browser path");
			return Some(path.clone());
		}
		warn!(
			target = "broker.launch",
			path = %path.display(),
			"configured browser path does not exist; falling back to discovery"
		);
	}

	for location in well_known_locations() {
		let path = PathBuf::from(location);
		if path.exists() {
			debug!(target = "broker.launch", path = %path.display(), "found browser install");
			return Some(path);
		}
	}

	find_in_path()
}

/// Whether a process executable name plausibly belongs to the browser this
/// broker launches. The orphan sweep refuses to kill anything else.
pub fn looks_like_browser(name: &str) -> bool {
	let name = name.to_ascii_lowercase();
	name.contains("chrome") || name.contains("chromium")
}

#[cfg(target_os = "macos")]
fn well_known_locations() -> &'static [&'static str] {
	&[
		"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
		"/Applications/Chromium.app/Contents/MacOS/Chromium",
	]
}

#[cfg(all(unix, not(target_os = "macos")))]
fn well_known_locations() -> &'static [&'static str] {
	&[
		"/usr/bin/google-chrome",
		"/usr/bin/google-chrome-stable",
		"/usr/bin/chromium",
		"/usr/bin/chromium-browser",
		"/snap/bin/chromium",
	]
}

#[cfg(windows)]
fn well_known_locations() -> &'static [&'static str] {
	&[
		"C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
		"C:\\Program Files (x86)\\Google\\Chrome\\Application\\chrome.exe",
	]
}

fn find_in_path() -> Option<PathBuf> {
	#[cfg(not(windows))]
	let which_cmd = "which";
	#[cfg(windows)]
	let which_cmd = "where";

	for candidate in PATH_CANDIDATES {
		let Ok(output) = Command::new(which_cmd).arg(candidate).output() else {
			continue;
		};
		if !output.status.success() {
			continue;
		}
		let raw = String::from_utf8_lossy(&output.stdout);
		let first = raw.lines().next().unwrap_or("").trim();
		if first.is_empty() {
			continue;
		}
		let path = PathBuf::from(first);
		if path.exists() {
			debug!(target = "broker.launch", path = %path.display(), "found browser on PATH");
			return Some(path);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn explicit_override_wins_when_present() {
		let temp = tempfile::TempDir::new().unwrap();
		let fake = temp.path().join("fake-chrome");
		std::fs::write(&fake, "#!/bin/sh\n").unwrap();

		let config = BrokerConfig {
			executable: Some(fake.clone()),
			..Default::default()
		};
		assert_eq!(find_browser(&config), Some(fake));
	}

	#[test]
	fn missing_override_falls_through() {
		let config = BrokerConfig {
			executable: Some(PathBuf::from("/definitely/not/here/chrome")),
			..Default::default()
		};
		// Result depends on the host, but it must not return the bogus path.
		if let Some(found) = find_browser(&config) {
			assert_ne!(found, PathBuf::from("/definitely/not/here/chrome"));
		}
	}

	#[test]
	fn browser_name_matching() {
		for name in ["chrome", "Google Chrome", "chromium-browser", "chrome.exe"] {
			assert!(looks_like_browser(name), "{name}");
		}
		for name in ["firefox", "node", "cargo", ""] {
			assert!(!looks_like_browser(name), "{name}");
		}
	}
}
