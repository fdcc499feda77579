//! WebSocket upgrade passthrough (§6): the handshake is captured as a
//! single row (`method: "WEBSOCKET"`, `status: 101`), then both directions
//! are pipe-spliced with no frame-level inspection — upgraded connections
//! are opaque to the capture pipeline by design (§1 non-goals scope the
//! core to HTTP semantics, not the WebSocket frame format).

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::engine::Engine;
use crate::events::Event;
use crate::store::{PendingRequest, ResponseUpdate};

use super::upstream::{self, BoxBodyBytes};
use super::{is_hop_by_hop, normalize_headers};

pub fn wants_upgrade(req: &Request<Incoming>) -> bool {
	req
		.headers()
		.get(http::header::UPGRADE)
		.and_then(|v| v.to_str().ok())
		.map(|v| v.eq_ignore_ascii_case("websocket"))
		.unwrap_or(false)
}

/// Takes the request's upgrade future before consuming it, forwards the
/// handshake line-for-line to the origin, and — if the origin accepts with
/// `101` — hands both raw sockets off to a byte-for-byte splice.
pub async fn handle(
	engine: Arc<Engine>,
	mut req: Request<Incoming>,
	host: String,
	port: u16,
) -> Response<BoxBodyBytes> {
	let method = req.method().as_str().to_string();
	let path = {
		let mut p = req.uri().path().to_string();
		if p.is_empty() {
			p.push('/');
		}
		if let Some(q) = req.uri().query() {
			p.push('?');
			p.push_str(q);
		}
		p
	};
	let url = req.uri().to_string();
	let headers = normalize_headers(req.headers());
	let timestamp_ms = chrono::Utc::now().timestamp_millis();

	let on_upgrade: OnUpgrade = hyper::upgrade::on(&mut req);
	let request_line = build_request_line(&method, &path, &headers, &host);

	let origin = match TcpStream::connect((host.as_str(), port)).await {
		Ok(stream) => stream,
		Err(err) => {
			tracing::debug!(%err, %host, "websocket upstream connect failed");
			return bad_gateway();
		}
	};

	tokio::spawn(async move {
		if let Err(err) = splice(on_upgrade, origin, request_line, &engine, timestamp_ms, url, host, path, headers).await
		{
			tracing::debug!(%err, "websocket splice ended");
		}
	});

	Response::builder()
		.status(StatusCode::SWITCHING_PROTOCOLS)
		.header(http::header::UPGRADE, HeaderValue::from_static("websocket"))
		.header(http::header::CONNECTION, HeaderValue::from_static("Upgrade"))
		.body(upstream::empty_body())
		.unwrap_or_else(|_| bad_gateway())
}

#[allow(clippy::too_many_arguments)]
async fn splice(
	on_upgrade: OnUpgrade,
	mut origin: TcpStream,
	request_line: Vec<u8>,
	engine: &Arc<Engine>,
	timestamp_ms: i64,
	url: String,
	host: String,
	path: String,
	headers: crate::model::Headers,
) -> std::io::Result<()> {
	origin.write_all(&request_line).await?;

	let mut reader = BufReader::new(&mut origin);
	let (status, response_headers) = read_response_head(&mut reader).await?;

	let row_id = engine
		.store
		.insert_pending(PendingRequest {
			timestamp_ms,
			method: "WEBSOCKET".to_string(),
			url,
			host,
			path,
			request_headers: headers,
			request_body: None,
		})
		.await
		.ok();

	if let Some(id) = row_id {
		let update = ResponseUpdate {
			status,
			response_headers,
			response_body: None,
			content_type: None,
			duration_ms: 0,
			size: 0,
		};
		if engine.store.finalize(id, update).await.is_ok() {
			if let Ok(Some(row)) = engine.store.get_by_id(id).await {
				engine.events.emit(Event::RequestComplete(Box::new(row)));
			}
		}
	}

	if status != 101 {
		return Ok(());
	}

	let Ok(upgraded) = on_upgrade.await else {
		return Ok(());
	};
	let mut client_io = TokioIo::new(upgraded);
	tokio::io::copy_bidirectional(&mut client_io, &mut origin).await?;
	Ok(())
}

fn build_request_line(method: &str, path: &str, headers: &crate::model::Headers, host: &str) -> Vec<u8> {
	let mut out = format!("{method} {path} HTTP/1.1\r\n").into_bytes();
	out.extend_from_slice(format!("host: {host}\r\n").as_bytes());
	for (name, value) in headers {
		if name.eq_ignore_ascii_case("host") || is_hop_by_hop(name) {
			continue;
		}
		out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
	}
	out.extend_from_slice(b"connection: Upgrade\r\nupgrade: websocket\r\n\r\n");
	out
}

async fn read_response_head<R: tokio::io::AsyncRead + Unpin>(
	reader: &mut BufReader<R>,
) -> std::io::Result<(u16, crate::model::Headers)> {
	use tokio::io::AsyncBufReadExt;

	let mut status_line = String::new();
	reader.read_line(&mut status_line).await?;
	let status = status_line
		.split_whitespace()
		.nth(1)
		.and_then(|s| s.parse::<u16>().ok())
		.unwrap_or(502);

	let mut headers = Vec::new();
	loop {
		let mut line = String::new();
		reader.read_line(&mut line).await?;
		let trimmed = line.trim_end();
		if trimmed.is_empty() {
			break;
		}
		if let Some((name, value)) = trimmed.split_once(':') {
			headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
		}
	}
	Ok((status, headers))
}

fn bad_gateway() -> Response<BoxBodyBytes> {
	Response::builder()
		.status(StatusCode::BAD_GATEWAY)
		.body(upstream::empty_body())
		.unwrap_or_else(|_| Response::new(upstream::empty_body()))
}
