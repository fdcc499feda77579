//! HTTP handling shared by the plain path (C6) and the TLS MITM path (C7):
//! header normalisation, hop-by-hop stripping, and the body policy in
//! [`body`]. §4.2/§4.3/§4.6.

pub mod body;
pub mod exchange;
pub mod mitm;
pub mod plain;
pub mod tee;
pub mod upstream;
pub mod websocket;

use std::collections::HashSet;
use std::sync::LazyLock;

use http::HeaderMap;

use crate::model::Headers;

/// §4.3 "strip `Proxy-Connection`" plus the standard RFC 7230 §6.1 set —
/// both handlers strip the same list when rebuilding the upstream request
/// and the client-bound response.
static HOP_BY_HOP: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
	[
		"connection",
		"proxy-connection",
		"keep-alive",
		"proxy-authenticate",
		"proxy-authorization",
		"te",
		"trailer",
		"transfer-encoding",
		"upgrade",
	]
	.into_iter()
	.collect()
});

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
	HOP_BY_HOP.contains(name.to_ascii_lowercase().as_str())
}

/// Lowercases header names and comma-joins repeated ones, preserving
/// first-seen order (§4.7 "Header normalisation").
pub(crate) fn normalize_headers(headers: &HeaderMap) -> Headers {
	let mut ordered: Vec<(String, String)> = Vec::new();
	for name in headers.keys() {
		let key = name.as_str().to_ascii_lowercase();
		if ordered.iter().any(|(k, _)| k == &key) {
			continue;
		}
		let joined = headers
			.get_all(name)
			.iter()
			.filter_map(|v| v.to_str().ok())
			.collect::<Vec<_>>()
			.join(", ");
		ordered.push((key, joined));
	}
	ordered
}

pub(crate) fn header_value(headers: &Headers, name: &str) -> Option<String> {
	headers
		.iter()
		.find(|(k, _)| k.eq_ignore_ascii_case(name))
		.map(|(_, v)| v.clone())
}
