//! The data model (§3): [`CapturedExchange`], [`MockRule`],
//! [`BreakpointConfig`], and the breakpoint-pause snapshot types.

use serde::{Deserialize, Serialize};

/// Ordered header list, lowercase keys, multi-valued headers comma-joined
/// (§4.7 "Header normalisation"). Kept as a `Vec` rather than a `HashMap` so
/// insertion order survives to the API boundary; only the store collapses
/// it to a JSON object.
pub type Headers = Vec<(String, String)>;

/// One row per observed request/response pair (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapturedExchange {
	pub id: i64,
	pub timestamp_ms: i64,
	pub method: String,
	pub url: String,
	pub host: String,
	pub path: String,
	/// `0` while pending; final status code when recorded; `502`/`499` per
	/// §3.
	pub status: u16,
	pub request_headers: Headers,
	pub response_headers: Headers,
	pub request_body: Option<String>,
	pub response_body: Option<String>,
	pub content_type: Option<String>,
	pub duration_ms: i64,
	/// On-wire (possibly still-compressed) response body length.
	pub size: i64,
}

impl CapturedExchange {
	pub fn is_pending(&self) -> bool {
		self.status == 0
	}
}

/// A pattern-matched synthetic response (§3, C4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MockRule {
	pub id: i64,
	pub name: String,
	pub enabled: bool,
	/// Case-insensitive regex matched against the full request URL.
	pub url_pattern: String,
	/// Unfiltered (matches any method) when absent.
	pub method: Option<String>,
	pub response_status: u16,
	pub response_headers: Headers,
	pub response_body: String,
	#[serde(default)]
	pub delay_ms: u64,
}

/// A new rule prior to store assignment of `id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewMockRule {
	pub name: String,
	pub enabled: bool,
	pub url_pattern: String,
	pub method: Option<String>,
	pub response_status: u16,
	pub response_headers: Headers,
	pub response_body: String,
	#[serde(default)]
	pub delay_ms: u64,
}

/// Process-wide single value controlling when messages pause (§3, C5).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BreakpointConfig {
	pub enabled: bool,
	pub break_on_request: bool,
	pub break_on_response: bool,
	/// Case-insensitive regex; unset matches everything.
	pub url_pattern: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Direction {
	Request,
	Response,
}

/// Snapshot of the message handed to the breakpoint controller, and
/// returned (possibly edited) on `continue`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterceptedMessage {
	pub method: String,
	pub url: String,
	pub headers: Headers,
	pub body: Option<bytes::Bytes>,
	/// Present only when `direction == Response`.
	pub status: Option<u16>,
}

/// Snapshot broadcast to controllers via `breakpoint:hit` (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingInterceptionSnapshot {
	pub id: u64,
	pub direction: Direction,
	pub message: InterceptedMessage,
}

/// The controller's reply to a paused message (§4.5, §9 "tagged verdict
/// union").
#[derive(Clone, Debug)]
pub enum Verdict {
	Continue(Option<InterceptedMessage>),
	Drop,
}
