//! Payload fragments for the asynchronous events the broker ingests.
//!
//! All fields default aggressively: event payloads come from an external
//! process and a missing field must never abort ingestion.

use serde::Deserialize;
use serde_json::Value;

/// `Runtime.consoleAPICalled`: one `console.*` invocation in the page.
#[derive(Debug, Deserialize)]
pub struct ConsoleApiCalled {
	/// Call kind: `log`, `warning`, `error`, `debug`, `info`, ...
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub args: Vec<RemoteObject>,
	#[serde(default)]
	pub timestamp: f64,
}

/// `Log.entryAdded`: browser-level log entry (network errors, violations).
#[derive(Debug, Deserialize)]
pub struct LogEntryAdded {
	pub entry: LogEntry,
}

#[derive(Debug, Deserialize)]
pub struct LogEntry {
	#[serde(default)]
	pub level: String,
	#[serde(default)]
	pub text: String,
	#[serde(default)]
	pub timestamp: f64,
}

/// `Network.requestWillBeSent`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
	pub request_id: String,
	pub request: RequestInfo,
	#[serde(default)]
	pub timestamp: f64,
}

#[derive(Debug, Deserialize)]
pub struct RequestInfo {
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub method: String,
}

/// `Network.responseReceived`: the success terminal event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
	pub request_id: String,
	pub response: ResponseInfo,
	#[serde(default)]
	pub timestamp: f64,
}

#[derive(Debug, Deserialize)]
pub struct ResponseInfo {
	#[serde(default)]
	pub status: i64,
}

/// `Network.loadingFailed`: the failure terminal event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
	pub request_id: String,
	#[serde(default)]
	pub error_text: String,
	#[serde(default)]
	pub timestamp: f64,
}

/// A value mirrored out of the page, as attached to console call arguments.
///
/// The browser serializes arguments in several mutually exclusive shapes;
/// [`RemoteObject::shape`] collapses them into a closed classification so
/// rendering code has an explicit fallback arm instead of ad hoc probing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub value: Option<Value>,
	/// `NaN`, `Infinity`, `-0` and friends arrive here as strings.
	#[serde(default)]
	pub unserializable_value: Option<String>,
	/// Human-readable rendering for objects and functions.
	#[serde(default)]
	pub description: Option<String>,
}

/// Closed classification of a [`RemoteObject`]'s payload shape.
#[derive(Debug, PartialEq, Eq)]
pub enum ObjectShape<'a> {
	/// A JSON-representable value was mirrored directly.
	Primitive(&'a Value),
	Undefined,
	/// Numeric values JSON cannot carry, pre-rendered by the browser.
	Unserializable(&'a str),
	/// Only a textual description is available (objects, functions, symbols).
	DescriptionOnly(&'a str),
	/// Nothing recognizable; carries the reported type tag, possibly empty.
	Opaque(&'a str),
}

impl RemoteObject {
	pub fn shape(&self) -> ObjectShape<'_> {
		if self.kind == "undefined" {
			return ObjectShape::Undefined;
		}
		if let Some(value) = &self.value {
			return ObjectShape::Primitive(value);
		}
		if let Some(unserializable) = &self.unserializable_value {
			return ObjectShape::Unserializable(unserializable);
		}
		if let Some(description) = &self.description {
			return ObjectShape::DescriptionOnly(description);
		}
		ObjectShape::Opaque(&self.kind)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn object(raw: Value) -> RemoteObject {
		serde_json::from_value(raw).unwrap()
	}

	#[test]
	fn classifies_primitive() {
		let obj = object(json!({"type": "string", "value": "hello"}));
		assert_eq!(obj.shape(), ObjectShape::Primitive(&json!("hello")));
	}

	#[test]
	fn classifies_undefined() {
		let obj = object(json!({"type": "undefined"}));
		assert_eq!(obj.shape(), ObjectShape::Undefined);
	}

	#[test]
	fn classifies_unserializable() {
		let obj = object(json!({"type": "number", "unserializableValue": "NaN"}));
		assert_eq!(obj.shape(), ObjectShape::Unserializable("NaN"));
	}

	#[test]
	fn classifies_description_only() {
		let obj = object(json!({
			"type": "object",
			"className": "HTMLDivElement",
			"description": "div#root"
		}));
		assert_eq!(obj.shape(), ObjectShape::DescriptionOnly("div#root"));
	}

	#[test]
	fn falls_back_to_opaque() {
		let obj = object(json!({"type": "symbol"}));
		assert_eq!(obj.shape(), ObjectShape::Opaque("symbol"));

		let obj = object(json!({}));
		assert_eq!(obj.shape(), ObjectShape::Opaque(""));
	}

	#[test]
	fn parses_network_lifecycle_payloads() {
		let started: RequestWillBeSent = serde_json::from_value(json!({
			"requestId": "1000.1",
			"request": {"url": "http://localhost:3000/api", "method": "GET"},
			"timestamp": 123.5
		}))
		.unwrap();
		assert_eq!(started.request.method, "GET");

		let failed: LoadingFailed = serde_json::from_value(json!({
			"requestId": "1000.1",
			"errorText": "net::ERR_CONNECTION_REFUSED",
			"timestamp": 124.0
		}))
		.unwrap();
		assert_eq!(failed.error_text, "net::ERR_CONNECTION_REFUSED");
	}
}
