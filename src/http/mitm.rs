//! TLS MITM path (C7): terminate the client's TLS with a minted leaf,
//! reparse HTTP inside, forward over a fresh upstream TLS session (§4.3).

use std::io::Cursor;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use crate::engine::Engine;

use super::exchange::{self, ExchangeRequest, UpstreamTarget};
use super::normalize_headers;
use super::upstream::BoxBodyBytes;

#[derive(Debug, Error)]
pub enum Error {
	#[error("certificate mint failed: {0}")]
	Cert(#[from] crate::cert::Error),
	#[error("invalid PEM material for {host}")]
	InvalidPem { host: String },
	#[error("TLS config rejected: {0}")]
	Tls(#[from] rustls::Error),
	#[error("TLS accept failed: {0}")]
	Accept(#[source] std::io::Error),
	#[error("HTTP serve failed: {0}")]
	Serve(#[source] hyper::Error),
}

/// Terminates TLS on `io` using a leaf minted for `host`, then serves
/// HTTP/1.1 inside it, forwarding every request to `(host, port)` over a
/// fresh upstream TLS connection. One call handles one `CONNECT` tunnel's
/// lifetime. `io` is generic so this can run over both a raw accepted
/// socket and a hyper-upgraded one.
pub async fn serve<IO>(engine: Arc<Engine>, io: IO, host: String, port: u16) -> Result<(), Error>
where
	IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
	let certs = engine
		.certs
		.clone()
		.expect("mitm::serve is only reached when enable_https wired a cert factory");
	let leaf = certs.get_or_mint(&host)?;
	serve_with_leaf(engine, io, host, port, leaf).await
}

/// Same as [`serve`], but takes an already-minted leaf. The CONNECT handler
/// mints (or fetches the cached leaf) before acknowledging the tunnel so a
/// mint failure can still answer `502` on the CONNECT itself; this variant
/// avoids re-minting here (the cache makes a second `get_or_mint` call
/// free, but there is no reason to pay even that lookup twice).
pub async fn serve_with_leaf<IO>(
	engine: Arc<Engine>,
	io: IO,
	host: String,
	port: u16,
	leaf: Arc<crate::cert::CertifiedKey>,
) -> Result<(), Error>
where
	IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
	let server_config = build_server_config(&leaf, &host)?;
	let acceptor = TlsAcceptor::from(Arc::new(server_config));
	let tls_stream = acceptor.accept(io).await.map_err(Error::Accept)?;

	let host_for_service = host.clone();
	let service = service_fn(move |req| {
		let engine = engine.clone();
		let host = host_for_service.clone();
		async move { Ok::<_, std::convert::Infallible>(handle(engine, req, host, port).await) }
	});

	http1::Builder::new()
		.keep_alive(true)
		.serve_connection(TokioIo::new(tls_stream), service)
		.await
		.map_err(Error::Serve)
}

/// ALPN advertises only `http/1.1` (§4.3: "HTTP/2 is explicitly not
/// supported on the intercepted leg"). rustls does not implement TLS 1.0/1.1
/// (removed upstream years ago); the widest range it offers is 1.2–1.3,
/// which is what we negotiate — a deliberate narrowing of the legacy-client
/// allowance rather than a hand-rolled protocol implementation.
fn build_server_config(leaf: &crate::cert::CertifiedKey, host: &str) -> Result<ServerConfig, Error> {
	let cert_chain = parse_cert_chain(&leaf.cert_pem, host)?;
	let key = parse_private_key(&leaf.private_key_pem, host)?;

	let mut config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
		.with_no_client_auth()
		.with_single_cert(cert_chain, key)?;
	config.alpn_protocols = vec![b"http/1.1".to_vec()];
	Ok(config)
}

fn parse_cert_chain(pem: &str, host: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
	let mut reader = Cursor::new(pem.as_bytes());
	rustls_pemfile::certs(&mut reader)
		.collect::<Result<Vec<_>, _>>()
		.map_err(|_| Error::InvalidPem { host: host.to_string() })
}

fn parse_private_key(pem: &str, host: &str) -> Result<PrivateKeyDer<'static>, Error> {
	let mut reader = Cursor::new(pem.as_bytes());
	rustls_pemfile::private_key(&mut reader)
		.map_err(|_| Error::InvalidPem { host: host.to_string() })?
		.ok_or(Error::InvalidPem { host: host.to_string() })
}

async fn handle(
	engine: Arc<Engine>,
	req: Request<Incoming>,
	host: String,
	port: u16,
) -> Response<BoxBodyBytes> {
	let method = req.method().as_str().to_string();
	let mut path = req.uri().path().to_string();
	if path.is_empty() {
		path.push('/');
	}
	if let Some(q) = req.uri().query() {
		path.push('?');
		path.push_str(q);
	}

	let url = if port == 443 {
		format!("https://{host}{path}")
	} else {
		format!("https://{host}:{port}{path}")
	};

	let headers = normalize_headers(req.headers());
	let body = match http_body_util::BodyExt::collect(req.into_body()).await {
		Ok(collected) => collected.to_bytes(),
		Err(_) => bytes::Bytes::new(),
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
		use_tls: true,
	};

	exchange::process(engine, request, upstream).await
}
