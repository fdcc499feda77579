//! Plaintext HTTP path (C6): absolute-form request-target in, proxied
//! response out, every exchange captured (§4.2).

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;

use crate::engine::Engine;

use super::exchange::{self, ExchangeRequest, UpstreamTarget};
use super::normalize_headers;
use super::upstream::BoxBodyBytes;

/// Serves one client connection on the plain-HTTP path. Connections are
/// sequential per §5 ("HTTP/1.1 keep-alive is serial"); `http1::Builder`
/// already enforces that by construction.
pub async fn serve<IO>(engine: Arc<Engine>, io: IO) -> Result<(), hyper::Error>
where
	IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
	let service = service_fn(move |req| {
		let engine = engine.clone();
		async move { Ok::<_, std::convert::Infallible>(handle(engine, req).await) }
	});

	http1::Builder::new()
		.keep_alive(true)
		.serve_connection(TokioIo::new(io), service)
		.await
}

pub(crate) async fn handle(engine: Arc<Engine>, req: Request<Incoming>) -> Response<BoxBodyBytes> {
	let method = req.method().as_str().to_string();
	let uri = req.uri().clone();

	let Some(host) = uri.host().map(str::to_string) else {
		return bad_request();
	};
	let port = uri.port_u16().unwrap_or(80);
	let path = if uri.path().is_empty() { "/" } else { uri.path() }.to_string();
	let path = match uri.query() {
		Some(q) => format!("{path}?{q}"),
		None => path,
	};
	let url = uri.to_string();

	let headers = normalize_headers(req.headers());
	// §4.2 step 1: fully buffer the request body regardless of size; only
	// the *stored* copy is capped (§4.6), forwarding always sees it whole.
	let body = match req.into_body().collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(_) => Bytes::new(),
	};

	let request = ExchangeRequest {
		method,
		url,
		host: host.clone(),
		path,
		headers,
		body,
	};
	let upstream = UpstreamTarget {
		host,
		port,
		use_tls: false,
	};

	exchange::process(engine, request, upstream).await
}

fn bad_request() -> Response<BoxBodyBytes> {
	Response::builder()
		.status(hyper::StatusCode::BAD_REQUEST)
		.body(super::upstream::empty_body())
		.expect("static response is well-formed")
}
