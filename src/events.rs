//! The three stable event contracts (§6, §9 "typed channels/callbacks"):
//! `request:complete`, `breakpoint:hit`, `proxy:error`. Modeled as an
//! explicit typed-payload registry over `tokio::sync::broadcast` rather than
//! a string-keyed emitter, per the redesign flag.

use tokio::sync::broadcast;

use crate::model::{CapturedExchange, PendingInterceptionSnapshot};

#[derive(Clone, Debug)]
pub enum Event {
	/// One per exchange, exactly once, emitted after the store row reaches
	/// its final state.
	RequestComplete(Box<CapturedExchange>),
	/// One per breakpoint pause.
	BreakpointHit(Box<PendingInterceptionSnapshot>),
	/// Transport/bind errors surfaced to external consumers.
	ProxyError(String),
}

/// Bounded broadcast so a slow/absent subscriber can't backpressure the
/// proxy; late subscribers simply miss events emitted before they joined,
/// matching a typical UI event bus.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
	tx: broadcast::Sender<Event>,
}

impl EventBus {
	pub fn new() -> Self {
		let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
		EventBus { tx }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.tx.subscribe()
	}

	pub fn emit(&self, event: Event) {
		// No subscribers is the common case outside tests; dropping the
		// event is correct, not an error.
		let _ = self.tx.send(event);
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}
