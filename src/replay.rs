//! Replay/Composer (C9): synthesize an outbound request from stored or
//! user-supplied data and return the captured exchange, bypassing the
//! proxy front entirely (§4.8).
//!
//! `send`/`replay` reuse [`crate::http::upstream`] for the actual wire
//! transfer — the same "accept any origin cert" TLS policy applies, since
//! this is the same inspection tool, just invoked without a client in the
//! loop — but assign ids from a private counter rather than the store, so
//! a replay that the caller chooses not to persist never collides with a
//! store-assigned id.

use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use http_body_util::BodyExt;
use thiserror::Error;
use url::Url;

use crate::http::upstream::{self, BoxBodyBytes};
use crate::model::{CapturedExchange, Headers};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid url: {0}")]
	InvalidUrl(#[from] url::ParseError),
	#[error("url has no host")]
	NoHost,
	#[error("row {0} not found")]
	NotFound(i64),
	#[error(transparent)]
	Store(#[from] crate::store::Error),
	#[error(transparent)]
	Upstream(#[from] upstream::Error),
	#[error(transparent)]
	Http(#[from] http::Error),
}

/// A request the caller wants issued directly, bypassing the proxy front
/// (§4.8 "synthesize an outbound request from stored or user-supplied
/// data").
#[derive(Clone, Debug)]
pub struct ComposedRequest {
	pub method: String,
	pub url: String,
	pub headers: Headers,
	pub body: Option<Bytes>,
}

/// Offset chosen so synthetic ids (always negative) can never collide with
/// a store-assigned `AUTOINCREMENT` id (always positive) (§4.8).
const SYNTHETIC_ID_OFFSET: i64 = -1;

pub struct Composer {
	store: Store,
	next_id: AtomicI64,
}

impl Composer {
	pub fn new(store: Store) -> Self {
		Composer {
			store,
			next_id: AtomicI64::new(SYNTHETIC_ID_OFFSET),
		}
	}

	/// Issues `composed` to its origin with upstream certificate validation
	/// disabled, returning the resulting exchange. Whether to also persist
	/// it via the store is the caller's decision — `send` never calls
	/// `save_request` itself (§4.8).
	pub async fn send(&self, composed: ComposedRequest) -> Result<CapturedExchange, Error> {
		let parsed = Url::parse(&composed.url)?;
		let host = parsed.host_str().ok_or(Error::NoHost)?.to_string();
		let use_tls = parsed.scheme() == "https";
		let port = parsed.port_or_known_default().unwrap_or(if use_tls { 443 } else { 80 });
		let path = {
			let mut p = parsed.path().to_string();
			if p.is_empty() {
				p.push('/');
			}
			if let Some(q) = parsed.query() {
				p.push('?');
				p.push_str(q);
			}
			p
		};

		let timestamp_ms = chrono::Utc::now().timestamp_millis();
		let started = std::time::Instant::now();
		let body = composed.body.clone().unwrap_or_default();

		let mut builder = hyper::Request::builder().method(composed.method.as_str()).uri(path.as_str());
		let mut host_header_set = false;
		for (name, value) in &composed.headers {
			if name.eq_ignore_ascii_case("host") {
				continue;
			}
			if let Ok(value) = http::HeaderValue::from_str(value) {
				builder = builder.header(name, value);
			}
		}
		if let Ok(value) = http::HeaderValue::from_str(&host) {
			builder = builder.header(http::header::HOST, value);
			host_header_set = true;
		}
		debug_assert!(host_header_set, "host header must always be settable");
		let request: hyper::Request<BoxBodyBytes> = builder.body(upstream::full_body(body.clone()))?;

		let response = upstream::send(&host, port, use_tls, request).await?;
		let (parts, response_body) = response.into_parts();
		let collected = response_body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
		let on_wire_len = collected.len() as i64;

		let content_type = parts
			.headers
			.get(http::header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.map(crate::http::body::content_type_token);
		let content_encoding = parts
			.headers
			.get(http::header::CONTENT_ENCODING)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string);
		let response_body = crate::http::body::response_body_for_storage(&collected, content_encoding.as_deref(), usize::MAX);

		let id = self.next_id.fetch_sub(1, Ordering::SeqCst);

		Ok(CapturedExchange {
			id,
			timestamp_ms,
			method: composed.method,
			url: composed.url,
			host,
			path,
			status: parts.status.as_u16(),
			request_headers: composed.headers,
			response_headers: crate::http::normalize_headers(&parts.headers),
			request_body: crate::http::body::request_body_for_storage(&body, usize::MAX),
			response_body,
			content_type,
			duration_ms: started.elapsed().as_millis() as i64,
			size: on_wire_len,
		})
	}

	/// Fetches the stored row `id`, composes a request from its request
	/// side, and `send`s it. The original row is never modified (§4.8).
	pub async fn replay(&self, id: i64) -> Result<CapturedExchange, Error> {
		let row = self.store.get_by_id(id).await?.ok_or(Error::NotFound(id))?;
		let composed = ComposedRequest {
			method: row.method,
			url: row.url,
			headers: row.request_headers,
			body: row.request_body.map(|s| Bytes::from(s.into_bytes())),
		};
		self.send(composed).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	// Network-backed coverage (a mock origin actually answering `send`) lives
	// in `tests/replay.rs`, per this codebase's convention of keeping
	// wiremock-driven cases out of inline unit tests.

	#[test]
	fn synthetic_ids_start_below_zero_and_decrement() {
		let next = AtomicI64::new(SYNTHETIC_ID_OFFSET);
		let first = next.fetch_sub(1, Ordering::SeqCst);
		let second = next.fetch_sub(1, Ordering::SeqCst);
		assert!(first < 0 && second < 0);
		assert!(second < first);
	}

	#[tokio::test]
	async fn send_rejects_a_url_with_no_host() {
		let store = Store::open_in_memory().await.unwrap();
		let composer = Composer::new(store);
		let composed = ComposedRequest {
			method: "GET".to_string(),
			url: "not-a-url".to_string(),
			headers: Vec::new(),
			body: None,
		};
		assert!(composer.send(composed).await.is_err());
	}

	#[tokio::test]
	async fn replay_of_an_unknown_id_is_not_found() {
		let store = Store::open_in_memory().await.unwrap();
		let composer = Composer::new(store);
		assert!(matches!(composer.replay(999).await, Err(Error::NotFound(999))));
	}

	#[tokio::test]
	async fn replay_does_not_mutate_the_original_row() {
		let store = Store::open_in_memory().await.unwrap();
		let id = store
			.insert_pending(crate::store::PendingRequest {
				timestamp_ms: 0,
				method: "GET".to_string(),
				url: "http://127.0.0.1:1/missing".to_string(),
				host: "127.0.0.1".to_string(),
				path: "/missing".to_string(),
				request_headers: Vec::new(),
				request_body: None,
			})
			.await
			.unwrap();
		store
			.finalize(
				id,
				crate::store::ResponseUpdate {
					status: 200,
					response_headers: Vec::new(),
					response_body: Some("original".to_string()),
					content_type: None,
					duration_ms: 1,
					size: 8,
				},
			)
			.await
			.unwrap();

		let before = store.get_by_id(id).await.unwrap().unwrap();
		let composer = Composer::new(store.clone());
		// connecting to a closed local port fails fast; we only care that
		// the stored row is untouched by the attempt.
		let _ = composer.replay(id).await;
		let after = store.get_by_id(id).await.unwrap().unwrap();
		assert_eq!(before.response_body, after.response_body);
		assert_eq!(before.status, after.status);
	}
}
