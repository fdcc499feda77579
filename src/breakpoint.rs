//! Breakpoint Rendezvous (C5): pause-edit-resume handshake between the
//! handler threads that own an in-flight exchange and whatever external
//! controller is watching `breakpoint:hit` (§4.5).
//!
//! Each pause registers a one-shot reply slot keyed by a process-wide
//! monotonic id; `resolve` feeds a [`Verdict`] back in; an internal
//! watchdog auto-resumes (`Verdict::Continue(None)`, i.e. forward
//! unmodified) after five minutes so a controller that never answers can't
//! wedge the proxy open (§5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::RegexBuilder;
use tokio::sync::oneshot;

use crate::events::{Event, EventBus};
use crate::model::{BreakpointConfig, Direction, InterceptedMessage, PendingInterceptionSnapshot, Verdict};

/// Matches the request/response watchdog in §5: an unattended breakpoint
/// resumes automatically rather than hanging the connection forever.
const AUTO_RESUME_AFTER: Duration = Duration::from_secs(5 * 60);

pub struct Controller {
	config: Mutex<BreakpointConfig>,
	next_id: AtomicU64,
	pending: Mutex<HashMap<u64, oneshot::Sender<Verdict>>>,
	events: Arc<EventBus>,
}

impl Controller {
	pub fn new(events: Arc<EventBus>) -> Self {
		Controller {
			config: Mutex::new(BreakpointConfig::default()),
			next_id: AtomicU64::new(1),
			pending: Mutex::new(HashMap::new()),
			events,
		}
	}

	pub fn set_config(&self, config: BreakpointConfig) {
		*self.config.lock() = config;
	}

	pub fn config(&self) -> BreakpointConfig {
		self.config.lock().clone()
	}

	/// Whether `direction`/`url` should pause, per the current config.
	pub fn should_break(&self, direction: Direction, url: &str) -> bool {
		let config = self.config.lock();
		if !config.enabled {
			return false;
		}
		let direction_enabled = match direction {
			Direction::Request => config.break_on_request,
			Direction::Response => config.break_on_response,
		};
		if !direction_enabled {
			return false;
		}
		match &config.url_pattern {
			None => true,
			Some(pattern) => RegexBuilder::new(pattern)
				.case_insensitive(true)
				.build()
				.map(|re| re.is_match(url))
				// an invalid pattern behaves as "match everything" would be
				// surprising; treat it as "never pauses" instead so a typo
				// in the pattern can't wedge every request open.
				.unwrap_or(false),
		}
	}

	/// Publishes `breakpoint:hit` and blocks the calling task until a
	/// controller resolves it, or the watchdog fires.
	pub async fn pause(&self, direction: Direction, message: InterceptedMessage) -> Verdict {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id, tx);

		self.events.emit(Event::BreakpointHit(Box::new(PendingInterceptionSnapshot {
			id,
			direction,
			message,
		})));

		match tokio::time::timeout(AUTO_RESUME_AFTER, rx).await {
			Ok(Ok(verdict)) => verdict,
			// sender dropped without resolving, or the watchdog elapsed:
			// forward the message unmodified rather than hang the
			// connection.
			Ok(Err(_)) | Err(_) => {
				self.pending.lock().remove(&id);
				Verdict::Continue(None)
			}
		}
	}

	/// Resolves a pending pause. Returns `false` if `id` is unknown (already
	/// resolved, timed out, or never existed).
	pub fn resolve(&self, id: u64, verdict: Verdict) -> bool {
		let sender = self.pending.lock().remove(&id);
		match sender {
			Some(tx) => tx.send(verdict).is_ok(),
			None => false,
		}
	}

	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}
}
