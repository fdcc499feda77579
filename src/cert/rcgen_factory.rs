//! Default [`Factory`](super::Factory) implementation: mints an ECDSA leaf
//! signed by a caller-supplied CA keypair, using `rcgen`. The CA itself
//! (generation, on-disk persistence, root trust bootstrap) is out of core
//! scope per §1 — callers hand this a parsed `rcgen::Certificate` +
//! `rcgen::KeyPair` they got from wherever the app stores its root.

use std::net::IpAddr;

use rcgen::{
	Certificate, CertificateParams, ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose, SanType,
};

use super::{Error, Factory};

/// PEM-encoded private key and leaf certificate, ready to feed into a
/// `rustls::ServerConfig` (via `rustls_pemfile` / `CertificateDer`).
#[derive(Clone, Debug)]
pub struct CertifiedKey {
	pub private_key_pem: String,
	pub cert_pem: String,
}

pub struct RcgenFactory {
	ca_cert: Certificate,
	ca_key: KeyPair,
}

impl RcgenFactory {
	/// `ca_cert_pem`/`ca_key_pem` are the app's root CA, already trusted by
	/// the client under test (bootstrapped by the external collaborator
	/// described in §1).
	pub fn from_pem(ca_cert_pem: &str, ca_key_pem: &str) -> Result<Self, Error> {
		let ca_key = KeyPair::from_pem(ca_key_pem).map_err(|e| Error::InvalidCa(e.to_string()))?;
		let ca_params = CertificateParams::from_ca_cert_pem(ca_cert_pem)
			.map_err(|e| Error::InvalidCa(e.to_string()))?;
		let ca_cert = ca_params
			.self_signed(&ca_key)
			.map_err(|e| Error::InvalidCa(e.to_string()))?;
		Ok(RcgenFactory { ca_cert, ca_key })
	}
}

impl Factory for RcgenFactory {
	/// Subject CN and SAN both cover `host` exactly (§4.3: "cache keyed by
	/// `host` exactly (no SAN expansion)").
	fn mint(&self, host: &str) -> Result<CertifiedKey, Error> {
		let mut params = if let Ok(ip) = host.parse::<IpAddr>() {
			let mut params = CertificateParams::new(Vec::new())?;
			params.subject_alt_names.push(SanType::IpAddress(ip.into()));
			params
		} else {
			CertificateParams::new(vec![host.to_string()])?
		};
		params
			.distinguished_name
			.push(rcgen::DnType::CommonName, host);
		params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
		params.key_usages = vec![
			KeyUsagePurpose::DigitalSignature,
			KeyUsagePurpose::KeyEncipherment,
		];

		// ECDSA P-256: cheap to generate per host, matching this codebase's
		// CSR issuance (`caclient.rs::csr::CsrOptions::generate`).
		let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
		let cert = params.signed_by(&key_pair, &self.ca_cert, &self.ca_key)?;

		Ok(CertifiedKey {
			private_key_pem: key_pair.serialize_pem(),
			cert_pem: cert.pem(),
		})
	}
}
