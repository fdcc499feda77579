//! `wiretrace` — an intercepting HTTP/HTTPS proxy that records every
//! request/response exchange it forwards, and exposes two live-traffic
//! manipulation primitives: mock rules and breakpoints (see `spec.md`,
//! `SPEC_FULL.md`).
//!
//! This crate is the traffic-plane core (§1): socket-level HTTP handling,
//! the CONNECT/TLS-MITM tunnel, leaf-certificate minting and caching, the
//! streaming capture pipeline, the mock matcher, the breakpoint rendezvous,
//! and the durable request store. The desktop UI, CA bootstrap, and export
//! encoders are external collaborators this crate does not implement.

pub mod breakpoint;
pub mod cert;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod front;
pub mod http;
pub mod mock;
pub mod model;
pub mod replay;
pub mod store;

pub use config::Config;
pub use engine::Engine;
pub use error::Error;
pub use front::{BoundFront, Front};
