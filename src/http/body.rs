//! Body size caps, decompression, and UTF-8 coercion shared by the plain
//! (C6) and MITM (C7) handlers (§4.6).

use bytes::Bytes;
use std::io::Read;

/// Truncates (for storage purposes only) a request body over the cap; the
/// full body is still forwarded to the origin by the caller.
pub fn request_body_for_storage(body: &Bytes, cap: usize) -> Option<String> {
	if body.is_empty() {
		return None;
	}
	if body.len() > cap {
		return Some(format!("[Body too large: {} bytes]", body.len()));
	}
	Some(coerce_utf8(body))
}

/// Decompresses `body` per `content_encoding` (storage copy only — the
/// on-wire bytes sent to the client are never touched), then caps and
/// UTF-8-coerces the result.
///
/// `on_wire_len` is what `CapturedExchange::size` must record regardless of
/// what this function returns for `response_body`.
pub fn response_body_for_storage(
	body: &Bytes,
	content_encoding: Option<&str>,
	cap: usize,
) -> Option<String> {
	if body.is_empty() {
		return None;
	}
	let decompressed = decompress(body, content_encoding);
	if decompressed.len() > cap {
		return Some(format!("[Body too large: {} bytes]", decompressed.len()));
	}
	Some(coerce_utf8(&decompressed))
}

/// Decompression failure degrades silently to the original bytes (§4.6,
/// §7 "Decompression/decoding").
fn decompress(body: &Bytes, content_encoding: Option<&str>) -> Bytes {
	match content_encoding.map(|e| e.trim().to_ascii_lowercase()) {
		Some(enc) if enc == "gzip" => try_gunzip(body).unwrap_or_else(|| body.clone()),
		Some(enc) if enc == "deflate" => try_inflate(body).unwrap_or_else(|| body.clone()),
		Some(enc) if enc == "br" => try_brotli(body).unwrap_or_else(|| body.clone()),
		_ => body.clone(),
	}
}

fn try_gunzip(body: &Bytes) -> Option<Bytes> {
	let mut decoder = flate2::read::GzDecoder::new(&body[..]);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out).ok()?;
	Some(Bytes::from(out))
}

fn try_inflate(body: &Bytes) -> Option<Bytes> {
	let mut decoder = flate2::read::DeflateDecoder::new(&body[..]);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out).ok()?;
	Some(Bytes::from(out))
}

fn try_brotli(body: &Bytes) -> Option<Bytes> {
	let mut out = Vec::new();
	brotli::BrotliDecompress(&mut &body[..], &mut out).ok()?;
	Some(Bytes::from(out))
}

/// Invalid UTF-8 becomes the sentinel, never a lossy replacement string —
/// a "mostly text with one bad byte" body should read as binary, not as
/// text full of U+FFFD.
fn coerce_utf8(bytes: &[u8]) -> String {
	match std::str::from_utf8(bytes) {
		Ok(s) => s.to_string(),
		Err(_) => "[Binary data]".to_string(),
	}
}

/// First `;`-separated token of a `Content-Type` header value (§3).
pub fn content_type_token(content_type: &str) -> String {
	content_type
		.split(';')
		.next()
		.unwrap_or(content_type)
		.trim()
		.to_string()
}
