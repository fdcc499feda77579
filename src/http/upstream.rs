//! Opens the outbound leg to the origin — plain TCP for the C6 path, TLS
//! (accepting any certificate, per the §1 non-goal) for the C7 path — and
//! drives a single request/response over it. Mirrors this codebase's
//! `send_upstream_request` shape: connect, hyper/1 handshake, one request.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

#[derive(Debug, Error)]
pub enum Error {
	#[error("connect to {host}:{port} failed: {source}")]
	Connect {
		host: String,
		port: u16,
		#[source]
		source: std::io::Error,
	},
	#[error("TLS handshake to {host} failed: {source}")]
	Tls {
		host: String,
		#[source]
		source: std::io::Error,
	},
	#[error("HTTP handshake failed: {0}")]
	Handshake(#[source] hyper::Error),
	#[error("request failed: {0}")]
	Request(#[source] hyper::Error),
}

pub type BoxBodyBytes = BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> BoxBodyBytes {
	Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

pub fn full_body(bytes: Bytes) -> BoxBodyBytes {
	Full::new(bytes).map_err(|never| match never {}).boxed()
}

/// Sends `req` to `(host, port)`, over TLS when `use_tls`. Origin certs are
/// accepted unconditionally (§1 "this is an inspection tool, not a trust
/// anchor").
pub async fn send(
	host: &str,
	port: u16,
	use_tls: bool,
	req: Request<BoxBodyBytes>,
) -> Result<hyper::Response<Incoming>, Error> {
	let tcp = TcpStream::connect((host, port))
		.await
		.map_err(|source| Error::Connect {
			host: host.to_string(),
			port,
			source,
		})?;

	if use_tls {
		let connector = TlsConnector::from(accept_any_client_config());
		let server_name = ServerName::try_from(host.to_string())
			.unwrap_or_else(|_| ServerName::try_from("localhost".to_string()).unwrap());
		let tls_stream = connector
			.connect(server_name, tcp)
			.await
			.map_err(|source| Error::Tls {
				host: host.to_string(),
				source,
			})?;
		send_over(tls_stream, req).await
	} else {
		send_over(tcp, req).await
	}
}

async fn send_over<IO>(io: IO, req: Request<BoxBodyBytes>) -> Result<hyper::Response<Incoming>, Error>
where
	IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
	let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
		.await
		.map_err(Error::Handshake)?;
	tokio::spawn(async move {
		if let Err(err) = conn.await {
			tracing::debug!(%err, "upstream connection closed");
		}
	});
	sender.send_request(req).await.map_err(Error::Request)
}

fn accept_any_client_config() -> Arc<rustls::ClientConfig> {
	let config = rustls::ClientConfig::builder()
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
		.with_no_client_auth();
	Arc::new(config)
}

/// §1 non-goal: "origin certificate validation... upstream certs are
/// accepted unconditionally".
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &rustls::DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn verify_tls13_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &rustls::DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
		vec![
			rustls::SignatureScheme::RSA_PKCS1_SHA256,
			rustls::SignatureScheme::RSA_PKCS1_SHA384,
			rustls::SignatureScheme::RSA_PKCS1_SHA512,
			rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
			rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
			rustls::SignatureScheme::RSA_PSS_SHA256,
			rustls::SignatureScheme::RSA_PSS_SHA384,
			rustls::SignatureScheme::RSA_PSS_SHA512,
			rustls::SignatureScheme::ED25519,
		]
	}
}
