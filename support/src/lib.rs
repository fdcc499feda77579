//! Shared foundation used by the `wiretrace` engine and binary: a prelude,
//! the graceful-drain primitive the proxy front uses for bounded shutdown,
//! and test-logging setup.

pub mod drain;
pub mod telemetry;

pub mod prelude {
	pub use std::sync::Arc;
	pub use std::time::{Duration, Instant};
	pub use tracing::{debug, error, info, trace, warn};
}
