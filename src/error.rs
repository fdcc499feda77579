//! Top-level error type. Each module defines its own `thiserror` enum for
//! the failures it can produce; this wraps them for callers of the public
//! engine API (`main.rs`, integration tests).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("startup: {0}")]
	Startup(String),

	#[error(transparent)]
	Store(#[from] crate::store::Error),

	#[error(transparent)]
	Cert(#[from] crate::cert::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}
