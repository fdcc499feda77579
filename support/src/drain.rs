//! Graceful-then-forced shutdown, adapted from this codebase's
//! `drain`/`signal` primitives for the proxy front's bounded shutdown: stop
//! accepting, let a grace period elapse, then force-close everything that's
//! still open.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

/// Paired with [`DrainWatcher`]; held by every task that is still doing work
/// the shutdown path should wait for.
#[derive(Clone)]
pub struct DrainWatcher {
	signal_rx: watch::Receiver<bool>,
}

impl DrainWatcher {
	/// Resolves once a drain has been signaled. Callers should stop accepting
	/// new work and start winding down when this completes.
	pub async fn signaled(&mut self) {
		let _ = self.signal_rx.changed().await;
	}

	pub fn is_draining(&self) -> bool {
		*self.signal_rx.borrow()
	}
}

pub struct DrainTrigger {
	signal_tx: watch::Sender<bool>,
}

impl DrainTrigger {
	pub fn signal(&self) {
		let _ = self.signal_tx.send(true);
	}
}

pub fn channel() -> (DrainTrigger, DrainWatcher) {
	let (signal_tx, signal_rx) = watch::channel(false);
	(DrainTrigger { signal_tx }, DrainWatcher { signal_rx })
}

/// Runs `graceful` (e.g. "wait for tracked connections to close on their
/// own") but never for longer than `deadline`; logs and moves on if the
/// grace period expires. Mirrors the 2s shutdown bound this codebase pins
/// for the proxy front.
pub async fn with_force_deadline<F>(component: &str, deadline: Duration, graceful: F)
where
	F: Future<Output = ()>,
{
	if tokio::time::timeout(deadline, graceful).await.is_err() {
		warn!(component, ?deadline, "shutdown deadline exceeded, forcing");
	} else {
		info!(component, "shutdown completed gracefully");
	}
}
