//! Leaf-certificate minting (C2) and caching (C3), §3/§4.3.
//!
//! [`Factory`] is the narrow interface the TLS MITM handler consumes; the
//! app's CA bootstrap (root key material, on-disk persistence) is an
//! external collaborator per §1 — this module only knows how to turn a CA
//! keypair it's handed into per-host leaves, grounded in this codebase's
//! `rcgen`-based CSR/cert issuance (`crates/agentgateway/src/control/caclient.rs`).

mod cache;
mod rcgen_factory;

pub use cache::Cache;
pub use rcgen_factory::{CertifiedKey, RcgenFactory};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("certificate generation failed: {0}")]
	Generation(#[from] rcgen::Error),
	#[error("invalid CA material: {0}")]
	InvalidCa(String),
}

/// Mints a leaf certificate (PEM key + PEM cert chain) for `host`, signed by
/// the app's CA. Implementations are expected to be cheap to call
/// repeatedly for distinct hosts; [`Cache`] is what makes repeated calls for
/// the *same* host unnecessary (§8 "Leaf-cert reuse").
pub trait Factory: Send + Sync {
	fn mint(&self, host: &str) -> Result<CertifiedKey, Error>;
}
