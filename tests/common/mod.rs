//! Shared scaffolding for the integration suite: spin up a real `Engine` +
//! `Front` against a temp-dir SQLite store, and (for the MITM cases) a
//! loopback TLS origin signed by a throwaway CA so the full CONNECT round
//! trip can be exercised without any OS-level proxy configuration (§4.11).

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rcgen::{CertificateParams, KeyPair, SanType};
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use wiretrace::cert::{CertifiedKey, Error as CertError, Factory};
use wiretrace::{Config, Engine};
use wiretrace_support::drain::{self, DrainTrigger};

pub struct Proxy {
	pub addr: SocketAddr,
	pub engine: Arc<Engine>,
	trigger: DrainTrigger,
	join: tokio::task::JoinHandle<()>,
}

impl Proxy {
	/// Stops accepting and waits for the (bounded) shutdown to finish.
	pub async fn shutdown(self) {
		self.trigger.signal();
		let _ = self.join.await;
	}
}

/// A [`Factory`] wrapper counting how many times `mint` was actually
/// invoked, for the "leaf-cert reuse" property (§8).
#[derive(Clone)]
pub struct CountingFactory {
	inner: Arc<dyn Factory>,
	pub calls: Arc<AtomicUsize>,
}

impl CountingFactory {
	pub fn wrap(inner: impl Factory + 'static) -> Self {
		CountingFactory {
			inner: Arc::new(inner),
			calls: Arc::new(AtomicUsize::new(0)),
		}
	}
}

impl Factory for CountingFactory {
	fn mint(&self, host: &str) -> Result<CertifiedKey, CertError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.inner.mint(host)
	}
}

/// Generates a throwaway CA, usable both to build a [`wiretrace::cert::RcgenFactory`]
/// and to hand the matching PEM to a test TLS client as a trusted root.
pub fn generate_test_ca() -> (String, String) {
	let mut params = CertificateParams::default();
	params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
	params.key_usages = vec![
		rcgen::KeyUsagePurpose::KeyCertSign,
		rcgen::KeyUsagePurpose::DigitalSignature,
	];
	let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
	let cert = params.self_signed(&key).unwrap();
	(cert.pem(), key.serialize_pem())
}

/// Boots an `Engine` + `Front` on an OS-assigned loopback port and returns a
/// handle to drive requests at it and tear it down afterwards.
pub async fn start_proxy(data_dir: &std::path::Path, cert_factory: Option<Box<dyn Factory>>) -> Proxy {
	wiretrace_support::telemetry::testing::setup_test_logging();

	let config = Config {
		port: 0,
		data_dir: data_dir.to_path_buf(),
		..Config::default()
	};
	let enable_https = cert_factory.is_some();
	let config = Config {
		enable_https,
		..config
	};
	let engine = Engine::new(config, cert_factory).await.expect("engine starts");

	let front = wiretrace::Front::new(engine.clone()).bind().await.expect("bind");
	let addr = front.local_addr().expect("local_addr");
	let (trigger, watcher) = drain::channel();
	let join = tokio::spawn(async move {
		let _ = front.serve(watcher).await;
	});

	Proxy {
		addr,
		engine,
		trigger,
		join,
	}
}

/// Starts a loopback HTTPS origin serving a fixed response, signed by a
/// throwaway self-signed cert. The proxy's outbound TLS leg accepts any
/// certificate (§1 non-goal), so this origin's cert never needs to chain
/// to anything the proxy or the test client trusts.
pub async fn start_tls_origin(status: u16, body: &'static str, content_type: &'static str) -> SocketAddr {
	// Independent of `Engine::new`'s own install attempt: a test may spin up
	// an origin before ever constructing an `Engine`.
	let _ = rustls::crypto::ring::default_provider().install_default();

	let loopback: std::net::IpAddr = std::net::IpAddr::from([127, 0, 0, 1]);
	let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
	params.subject_alt_names.push(SanType::IpAddress(loopback.into()));
	let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
	let cert = params.self_signed(&key).unwrap();

	let cert_chain = rustls_pemfile::certs(&mut std::io::Cursor::new(cert.pem().as_bytes()))
		.collect::<Result<Vec<_>, _>>()
		.unwrap();
	let key_der = rustls_pemfile::private_key(&mut std::io::Cursor::new(key.serialize_pem().as_bytes()))
		.unwrap()
		.unwrap();
	let server_config = ServerConfig::builder()
		.with_no_client_auth()
		.with_single_cert(cert_chain, key_der)
		.unwrap();
	let acceptor = TlsAcceptor::from(Arc::new(server_config));

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	tokio::spawn(async move {
		loop {
			let Ok((stream, _)) = listener.accept().await else {
				return;
			};
			let acceptor = acceptor.clone();
			tokio::spawn(async move {
				let Ok(tls) = acceptor.accept(stream).await else {
					return;
				};
				let service = service_fn(move |_req: Request<Incoming>| {
					let response = Response::builder()
						.status(status)
						.header("content-type", content_type)
						.body(Full::new(Bytes::from_static(body.as_bytes())).map_err(|never: std::convert::Infallible| match never {}).boxed())
						.unwrap();
					async move { Ok::<_, Infallible>(response) }
				});
				let _ = hyper::server::conn::http1::Builder::new()
					.serve_connection(TokioIo::new(tls), service)
					.await;
			});
		}
	});

	addr
}
