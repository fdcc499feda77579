//! Proxy Front (C8): accept loop, CONNECT/plain/WebSocket dispatch,
//! connection tracking, graceful-then-forced shutdown (§4.1, §5).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::Instrument;

use wiretrace_support::drain::DrainWatcher;

use crate::engine::Engine;
use crate::http::upstream::BoxBodyBytes;
use crate::http::{mitm, plain, upstream, websocket};

/// §5 "Shutdown force-close: 2 s after graceful `close()` is issued."
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum Error {
	#[error("bind {addr} failed: {source}")]
	Bind {
		addr: String,
		#[source]
		source: std::io::Error,
	},
}

pub struct Front {
	engine: Arc<Engine>,
}

/// A [`Front`] whose listener is already bound — split out of `Front` so
/// tests can learn the actual port before serving (§6 "default 8888" is
/// just the default; port `0` asks the OS for an ephemeral one).
pub struct BoundFront {
	engine: Arc<Engine>,
	listener: TcpListener,
}

impl Front {
	pub fn new(engine: Arc<Engine>) -> Self {
		Front { engine }
	}

	/// Binds the listening socket without serving yet.
	pub async fn bind(self) -> Result<BoundFront, Error> {
		let addr = format!("{}:{}", self.engine.config.host, self.engine.config.port);
		let listener = TcpListener::bind(&addr).await.map_err(|source| Error::Bind {
			addr: addr.clone(),
			source,
		})?;
		Ok(BoundFront {
			engine: self.engine,
			listener,
		})
	}

	/// Binds and serves in one call, per the prior one-shot `run` API.
	pub async fn run(self, drain: DrainWatcher) -> Result<(), Error> {
		self.bind().await?.serve(drain).await
	}
}

impl BoundFront {
	pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
		self.listener.local_addr()
	}

	/// Runs the accept loop until `drain` signals, then force-closes
	/// whatever connections are still open no later than
	/// [`SHUTDOWN_GRACE`] afterwards.
	pub async fn serve(self, mut drain: DrainWatcher) -> Result<(), Error> {
		let BoundFront { engine, listener } = self;
		tracing::info!(addr = ?listener.local_addr().ok(), "proxy front listening");

		let mut tasks: JoinSet<()> = JoinSet::new();

		loop {
			tokio::select! {
				_ = drain.signaled() => break,
				accepted = listener.accept() => {
					match accepted {
						Ok((stream, peer)) => {
							let engine = engine.clone();
							tracing::debug!(%peer, "accepted connection");
							let span = tracing::info_span!("connection", %peer);
							tasks.spawn(
								async move {
									// §7 "Per-connection transport ... isolated to
									// the connection, logged at debug ... not
									// escalated" — a reset or parse failure here
									// never reaches `proxy:error`.
									if let Err(err) = handle_connection(engine, stream).await {
										tracing::debug!(%err, "connection ended");
									}
								}
								.instrument(span),
							);
						}
						Err(err) => {
							tracing::debug!(%err, "accept failed");
						}
					}
				}
			}
		}

		tracing::info!("proxy front draining, no new accepts");
		wiretrace_support::drain::with_force_deadline("proxy front", SHUTDOWN_GRACE, async {
			while tasks.join_next().await.is_some() {}
		})
		.await;
		// aborts anything still running; a no-op if the loop above already
		// drained everything within the grace period.
		tasks.shutdown().await;
		Ok(())
	}
}

async fn handle_connection(engine: Arc<Engine>, stream: TcpStream) -> Result<(), hyper::Error> {
	stream.set_nodelay(true).ok();
	let service = service_fn(move |req| {
		let engine = engine.clone();
		async move { Ok::<_, Infallible>(route(engine, req).await) }
	});

	http1::Builder::new()
		.keep_alive(true)
		.serve_connection(TokioIo::new(stream), service)
		.with_upgrades()
		.await
}

async fn route(engine: Arc<Engine>, req: Request<Incoming>) -> Response<BoxBodyBytes> {
	if req.method() == Method::CONNECT {
		return handle_connect(engine, req).await;
	}
	if websocket::wants_upgrade(&req) {
		let Some(host) = req.uri().host().map(str::to_string) else {
			return bad_request();
		};
		let port = req.uri().port_u16().unwrap_or(80);
		return websocket::handle(engine, req, host, port).await;
	}
	plain::handle(engine, req).await
}

/// `CONNECT host:port`: when HTTPS interception is enabled, mint (or fetch
/// the cached) leaf certificate for `host` *before* acknowledging the
/// tunnel — a mint failure answers `502 Bad Gateway` on the CONNECT itself
/// rather than on the TLS handshake that follows (§4.3, §6: "any generation
/// failure yields a `502 Bad Gateway` on the tunnel"). Only once minting has
/// succeeded do we reply `200 Connection Established` and hand the
/// now-upgraded raw socket to the MITM handler; with interception disabled
/// the tunnel is a blind byte-for-byte splice instead.
async fn handle_connect(engine: Arc<Engine>, mut req: Request<Incoming>) -> Response<BoxBodyBytes> {
	let Some(authority) = req.uri().authority().cloned() else {
		return bad_request();
	};
	let host = authority.host().to_string();
	let port = authority.port_u16().unwrap_or(443);
	let enable_https = engine.config.enable_https;

	let leaf = if enable_https {
		let certs = engine
			.certs
			.clone()
			.expect("enable_https wired a cert factory at startup");
		match certs.get_or_mint(&host) {
			Ok(leaf) => Some(leaf),
			Err(err) => {
				tracing::debug!(%err, %host, "leaf certificate mint failed, refusing CONNECT");
				return bad_gateway();
			}
		}
	} else {
		None
	};

	let on_upgrade = hyper::upgrade::on(&mut req);

	tokio::spawn(async move {
		let upgraded = match on_upgrade.await {
			Ok(upgraded) => upgraded,
			Err(err) => {
				tracing::debug!(%err, "CONNECT upgrade failed");
				return;
			}
		};
		let io = TokioIo::new(upgraded);

		let result = if let Some(leaf) = leaf {
			mitm::serve_with_leaf(engine.clone(), io, host.clone(), port, leaf).await.map_err(|e| e.to_string())
		} else {
			blind_tunnel(io, &host, port).await.map_err(|e| e.to_string())
		};
		if let Err(err) = result {
			// §4.3 "suppress and swallow ... connection resets, broken
			// pipes ... (cert-pinning apps trip these)" — debug-only, no
			// escalation to proxy:error.
			tracing::debug!(%err, %host, "mitm/tunnel session ended");
		}
	});

	Response::builder()
		.status(hyper::StatusCode::OK)
		.body(upstream::empty_body())
		.unwrap_or_else(|_| Response::new(upstream::empty_body()))
}

fn bad_gateway() -> Response<BoxBodyBytes> {
	Response::builder()
		.status(hyper::StatusCode::BAD_GATEWAY)
		.body(upstream::empty_body())
		.unwrap_or_else(|_| Response::new(upstream::empty_body()))
}

async fn blind_tunnel<IO>(mut client: IO, host: &str, port: u16) -> std::io::Result<()>
where
	IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let mut origin = TcpStream::connect((host, port)).await?;
	tokio::io::copy_bidirectional(&mut client, &mut origin).await?;
	Ok(())
}

fn bad_request() -> Response<BoxBodyBytes> {
	Response::builder()
		.status(hyper::StatusCode::BAD_REQUEST)
		.body(upstream::empty_body())
		.unwrap_or_else(|_| Response::new(upstream::empty_body()))
}
