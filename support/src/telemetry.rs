//! Tracing setup, split out of `main.rs` the way this codebase keeps its
//! logging bootstrap in one reusable place.

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. `filter` is an `EnvFilter`
/// directive string (e.g. `"info"`, `"wiretrace=debug,hyper=warn"`); falls
/// back to `RUST_LOG`/`info` if empty.
pub fn init(filter: &str) {
	let env_filter = if filter.is_empty() {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
	} else {
		EnvFilter::new(filter)
	};
	let _ = tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.try_init();
}

pub mod testing {
	use std::sync::Once;

	static INIT: Once = Once::new();

	/// Installs a best-effort subscriber for `#[tokio::test]` bodies; safe to
	/// call from every test, idempotent across the test binary.
	pub fn setup_test_logging() {
		INIT.call_once(|| {
			super::init("wiretrace=debug,info");
		});
	}
}
