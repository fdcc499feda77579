//! The capture pipeline shared by the plain (C6) and MITM (C7) handlers:
//! mock short-circuit, request breakpoint, persist, forward, response
//! breakpoint, tee-to-storage, finalize (§4.2 steps 1-7, §4.3 "capture
//! policy is identical to §4.2").

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::HeaderValue;
use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode};
use tracing::Instrument;

use crate::engine::Engine;
use crate::events::Event;
use crate::model::{CapturedExchange, Direction, InterceptedMessage, Verdict};
use crate::store::{PendingRequest, ResponseUpdate};

use super::tee::TeeBody;
use super::upstream::{self, BoxBodyBytes};
use super::{body, header_value, is_hop_by_hop, normalize_headers};

pub struct ExchangeRequest {
	pub method: String,
	pub url: String,
	pub host: String,
	pub path: String,
	pub headers: crate::model::Headers,
	pub body: Bytes,
}

pub struct UpstreamTarget {
	pub host: String,
	pub port: u16,
	pub use_tls: bool,
}

/// Runs one request/response exchange to completion, returning the
/// response to send back on the client-facing connection. Storage
/// finalisation for the streaming case happens on a spawned task so
/// forwarding is never gated on it (§5 "store write" is a suspension point
/// of its own task, not of the one returning bytes to the client).
///
/// The `row_id` span field starts empty — the store doesn't assign one
/// until the request is persisted partway through — and is recorded once
/// known, so every log line from that point on carries it.
#[tracing::instrument(skip_all, fields(method = %request.method, url = %request.url, row_id = tracing::field::Empty))]
pub async fn process(
	engine: Arc<Engine>,
	request: ExchangeRequest,
	upstream_target: UpstreamTarget,
) -> Response<BoxBodyBytes> {
	let started = Instant::now();
	let timestamp_ms = chrono::Utc::now().timestamp_millis();
	let request_body_stored = body::request_body_for_storage(&request.body, engine.config.max_request_body_size);

	if let Some(rule) = engine.mocks.find(&request.method, &request.url) {
		return serve_mock(&engine, &request, rule, timestamp_ms, request_body_stored).await;
	}

	let mut forward_method = request.method.clone();
	let mut forward_headers = request.headers.clone();
	let mut forward_body = request.body.clone();

	if engine.breakpoints.should_break(Direction::Request, &request.url) {
		let message = InterceptedMessage {
			method: request.method.clone(),
			url: request.url.clone(),
			headers: request.headers.clone(),
			body: Some(request.body.clone()),
			status: None,
		};
		match engine.breakpoints.pause(Direction::Request, message).await {
			Verdict::Drop => {
				return dropped(&engine, &request, timestamp_ms, request_body_stored, started).await;
			}
			Verdict::Continue(Some(modified)) => {
				forward_method = modified.method;
				forward_headers = modified.headers;
				forward_body = modified.body.unwrap_or_default();
			}
			Verdict::Continue(None) => {}
		}
	}

	let row_id = match engine
		.store
		.insert_pending(PendingRequest {
			timestamp_ms,
			method: request.method.clone(),
			url: request.url.clone(),
			host: request.host.clone(),
			path: request.path.clone(),
			request_headers: request.headers.clone(),
			request_body: request_body_stored,
		})
		.await
	{
		Ok(id) => id,
		Err(err) => {
			tracing::warn!(%err, "failed to persist pending request");
			engine.events.emit(Event::ProxyError(err.to_string()));
			return bad_gateway(&err.to_string());
		}
	};
	tracing::Span::current().record("row_id", row_id);

	let upstream_req = match build_upstream_request(&upstream_target.host, &forward_method, &request.path, &forward_headers, forward_body) {
		Ok(req) => req,
		Err(err) => {
			return finalize_as_error(&engine, row_id, started, &err).await;
		}
	};

	let origin_response = match upstream::send(
		&upstream_target.host,
		upstream_target.port,
		upstream_target.use_tls,
		upstream_req,
	)
	.await
	{
		Ok(resp) => resp,
		Err(err) => {
			return finalize_as_error(&engine, row_id, started, &err).await;
		}
	};

	if engine.breakpoints.should_break(Direction::Response, &request.url) {
		return serve_buffered_response(&engine, row_id, started, origin_response).await;
	}

	serve_streamed_response(&engine, row_id, started, origin_response)
}

async fn serve_mock(
	engine: &Arc<Engine>,
	request: &ExchangeRequest,
	rule: crate::model::MockRule,
	timestamp_ms: i64,
	request_body_stored: Option<String>,
) -> Response<BoxBodyBytes> {
	if rule.delay_ms > 0 {
		tokio::time::sleep(std::time::Duration::from_millis(rule.delay_ms)).await;
	}

	let body_bytes = Bytes::from(rule.response_body.clone().into_bytes());
	let content_type = header_value(&rule.response_headers, "content-type")
		.map(|ct| body::content_type_token(&ct));

	let row_id = engine
		.store
		.insert_pending(PendingRequest {
			timestamp_ms,
			method: request.method.clone(),
			url: request.url.clone(),
			host: request.host.clone(),
			path: request.path.clone(),
			request_headers: request.headers.clone(),
			request_body: request_body_stored,
		})
		.await;

	if let Ok(id) = row_id {
		tracing::Span::current().record("row_id", id);
		let update = ResponseUpdate {
			status: rule.response_status,
			response_headers: rule.response_headers.clone(),
			response_body: Some(rule.response_body.clone()),
			content_type,
			duration_ms: rule.delay_ms as i64,
			size: body_bytes.len() as i64,
		};
		finalize_and_emit(engine, id, update).await;
	}

	let mut builder = Response::builder().status(
		StatusCode::from_u16(rule.response_status).unwrap_or(StatusCode::OK),
	);
	for (name, value) in &rule.response_headers {
		if let Ok(value) = HeaderValue::from_str(value) {
			builder = builder.header(name, value);
		}
	}
	builder
		.body(upstream::full_body(body_bytes))
		.unwrap_or_else(|_| bad_gateway("malformed mock response"))
}

async fn dropped(
	engine: &Arc<Engine>,
	request: &ExchangeRequest,
	timestamp_ms: i64,
	request_body_stored: Option<String>,
	started: Instant,
) -> Response<BoxBodyBytes> {
	let row_id = engine
		.store
		.insert_pending(PendingRequest {
			timestamp_ms,
			method: request.method.clone(),
			url: request.url.clone(),
			host: request.host.clone(),
			path: request.path.clone(),
			request_headers: request.headers.clone(),
			request_body: request_body_stored,
		})
		.await;

	if let Ok(id) = row_id {
		tracing::Span::current().record("row_id", id);
		let update = ResponseUpdate {
			status: 499,
			response_headers: Vec::new(),
			response_body: Some("Request dropped by user".to_string()),
			content_type: None,
			duration_ms: started.elapsed().as_millis() as i64,
			size: 0,
		};
		finalize_and_emit(engine, id, update).await;
	}

	Response::builder()
		.status(499u16)
		.body(upstream::full_body(Bytes::from_static(b"Request dropped by user")))
		.unwrap_or_else(|_| bad_gateway("breakpoint drop"))
}

async fn finalize_as_error(
	engine: &Arc<Engine>,
	row_id: i64,
	started: Instant,
	err: &dyn std::fmt::Display,
) -> Response<BoxBodyBytes> {
	let message = err.to_string();
	let update = ResponseUpdate {
		status: 502,
		response_headers: Vec::new(),
		response_body: Some(message.clone()),
		content_type: None,
		duration_ms: started.elapsed().as_millis() as i64,
		size: message.len() as i64,
	};
	finalize_and_emit(engine, row_id, update).await;
	engine.events.emit(Event::ProxyError(message.clone()));
	bad_gateway(&message)
}

fn serve_streamed_response(
	engine: &Arc<Engine>,
	row_id: i64,
	started: Instant,
	origin_response: hyper::Response<hyper::body::Incoming>,
) -> Response<BoxBodyBytes> {
	let (parts, origin_body) = origin_response.into_parts();
	let content_type = header_value_from_map(&parts.headers, "content-type");
	let content_encoding = header_value_from_map(&parts.headers, "content-encoding");
	let cap = engine.config.max_response_body_size;

	let (tee, captured_rx) = TeeBody::new(origin_body, cap);

	let engine = engine.clone();
	// `tokio::spawn` doesn't inherit the calling task's span, so carry
	// `process`'s (already row_id-recorded) span across explicitly —
	// otherwise this finalisation's log lines would show up span-less.
	let finalize_span = tracing::Span::current();
	tokio::spawn(
		async move {
			let Ok(captured) = captured_rx.await else {
				return;
			};
			let response_body = body::response_body_for_storage(&captured.bytes, content_encoding.as_deref(), cap);
			let update = ResponseUpdate {
				status: parts.status.as_u16(),
				response_headers: normalize_headers(&parts.headers),
				response_body,
				content_type: content_type.map(|ct| body::content_type_token(&ct)),
				duration_ms: started.elapsed().as_millis() as i64,
				size: captured.on_wire_len as i64,
			};
			finalize_and_emit(&engine, row_id, update).await;
		}
		.instrument(finalize_span),
	);

	let mut builder = Response::builder().status(parts.status);
	for (name, value) in parts.headers.iter() {
		if is_hop_by_hop(name.as_str()) {
			continue;
		}
		builder = builder.header(name, value);
	}
	builder
		.body(tee.boxed())
		.unwrap_or_else(|_| bad_gateway("malformed upstream response"))
}

async fn serve_buffered_response(
	engine: &Arc<Engine>,
	row_id: i64,
	started: Instant,
	origin_response: hyper::Response<hyper::body::Incoming>,
) -> Response<BoxBodyBytes> {
	let (parts, origin_body) = origin_response.into_parts();
	let on_wire_len = origin_body.size_hint().exact();
	let collected = match origin_body.collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(err) => return finalize_as_error(engine, row_id, started, &err).await,
	};
	let on_wire_len = on_wire_len.unwrap_or(collected.len() as u64);

	let message = InterceptedMessage {
		method: String::new(),
		url: String::new(),
		headers: normalize_headers(&parts.headers),
		body: Some(collected.clone()),
		status: Some(parts.status.as_u16()),
	};

	let (status, headers, body_bytes) = match engine.breakpoints.pause(Direction::Response, message).await {
		Verdict::Drop => {
			let update = ResponseUpdate {
				status: 499,
				response_headers: Vec::new(),
				response_body: Some("Request dropped by user".to_string()),
				content_type: None,
				duration_ms: started.elapsed().as_millis() as i64,
				size: 0,
			};
			finalize_and_emit(engine, row_id, update).await;
			return Response::builder()
				.status(499u16)
				.body(upstream::full_body(Bytes::from_static(b"Request dropped by user")))
				.unwrap_or_else(|_| bad_gateway("breakpoint drop"));
		}
		Verdict::Continue(Some(modified)) => (
			modified.status.unwrap_or(parts.status.as_u16()),
			modified.headers,
			modified.body.unwrap_or(collected),
		),
		Verdict::Continue(None) => (parts.status.as_u16(), normalize_headers(&parts.headers), collected),
	};

	let content_type = header_value(&headers, "content-type").map(|ct| body::content_type_token(&ct));
	let content_encoding = header_value(&headers, "content-encoding");
	let stored = body::response_body_for_storage(&body_bytes, content_encoding.as_deref(), engine.config.max_response_body_size);
	let update = ResponseUpdate {
		status,
		response_headers: headers.clone(),
		response_body: stored,
		content_type,
		duration_ms: started.elapsed().as_millis() as i64,
		size: on_wire_len as i64,
	};
	finalize_and_emit(engine, row_id, update).await;

	let mut builder = Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK));
	for (name, value) in &headers {
		if is_hop_by_hop(name) {
			continue;
		}
		if let Ok(value) = HeaderValue::from_str(value) {
			builder = builder.header(name, value);
		}
	}
	builder
		.body(upstream::full_body(body_bytes))
		.unwrap_or_else(|_| bad_gateway("malformed breakpoint response"))
}

async fn finalize_and_emit(engine: &Arc<Engine>, row_id: i64, update: ResponseUpdate) {
	if let Err(err) = engine.store.finalize(row_id, update).await {
		tracing::warn!(row_id, %err, "failed to finalize captured exchange");
		return;
	}
	if let Ok(Some(row)) = engine.store.get_by_id(row_id).await {
		engine.events.emit(Event::RequestComplete(Box::new(row)));
	}
}

fn build_upstream_request(
	host: &str,
	method: &str,
	path: &str,
	headers: &crate::model::Headers,
	body: Bytes,
) -> Result<Request<BoxBodyBytes>, http::Error> {
	let mut builder = Request::builder().method(method).uri(path);
	let mut host_set = false;
	for (name, value) in headers {
		if is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
			continue;
		}
		if let Ok(value) = HeaderValue::from_str(value) {
			builder = builder.header(name, value);
		}
	}
	if let Ok(value) = HeaderValue::from_str(host) {
		builder = builder.header(http::header::HOST, value);
		host_set = true;
	}
	debug_assert!(host_set, "host header must always be settable");
	builder.body(upstream::full_body(body))
}

fn header_value_from_map(headers: &http::HeaderMap, name: &str) -> Option<String> {
	headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn bad_gateway(message: &str) -> Response<BoxBodyBytes> {
	Response::builder()
		.status(StatusCode::BAD_GATEWAY)
		.body(upstream::full_body(Bytes::from(message.to_string())))
		.unwrap_or_else(|_| {
			let mut resp = Response::new(upstream::empty_body());
			*resp.status_mut() = StatusCode::BAD_GATEWAY;
			resp
		})
}
