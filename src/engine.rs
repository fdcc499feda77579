//! Wires the components together: the store, mock engine, breakpoint
//! controller, leaf-cert cache, and event bus that every connection task
//! borrows a reference to (§5 "shared state is concentrated in...").

use std::sync::Arc;

use crate::breakpoint::Controller as BreakpointController;
use crate::cert;
use crate::config::Config;
use crate::events::EventBus;
use crate::mock;
use crate::replay::Composer;
use crate::store::Store;

pub struct Engine {
	pub config: Config,
	pub store: Store,
	pub certs: Option<Arc<cert::Cache>>,
	pub mocks: Arc<mock::Engine>,
	pub breakpoints: Arc<BreakpointController>,
	pub events: Arc<EventBus>,
	/// C9: bypasses the proxy front entirely, reusing `store` as its capture
	/// sink (§2 "C9 bypasses C8 entirely, reusing C1 as its capture sink").
	pub composer: Composer,
}

impl Engine {
	/// Opens the store, rebuilds the mock engine from persisted rules, and
	/// wires a certificate factory when `enable_https` is set (§6
	/// "enable_https ... when false, CONNECT becomes a blind tunnel").
	pub async fn new(
		config: Config,
		cert_factory: Option<Box<dyn cert::Factory>>,
	) -> Result<Arc<Self>, crate::error::Error> {
		// rustls 0.23 needs a process-wide default `CryptoProvider` installed
		// before any `ServerConfig`/`ClientConfig` builder runs (C7's MITM
		// accept, C7's upstream TLS connect); harmless to attempt again if an
		// earlier `Engine` already installed one.
		let _ = rustls::crypto::ring::default_provider().install_default();

		let store = Store::open(&config.db_path()).await?;

		let mocks = Arc::new(mock::Engine::new());
		mocks.reload(store.list_rules().await?);

		let certs = cert_factory.map(|f| Arc::new(cert::Cache::new(CertFactoryBox(f))));

		let events = Arc::new(EventBus::new());
		let breakpoints = Arc::new(BreakpointController::new(events.clone()));
		let composer = Composer::new(store.clone());

		Ok(Arc::new(Engine {
			config,
			store,
			certs,
			mocks,
			breakpoints,
			events,
			composer,
		}))
	}

	/// Re-reads the rule set after a CRUD mutation through `store`.
	pub async fn reload_mocks(&self) -> Result<(), crate::error::Error> {
		self.mocks.reload(self.store.list_rules().await?);
		Ok(())
	}
}

/// Adapts a boxed trait object to `Factory` so `Cache::new` (which takes
/// `impl Factory + 'static`) can hold a `Box<dyn Factory>` produced by the
/// caller's chosen CA material.
struct CertFactoryBox(Box<dyn cert::Factory>);

impl cert::Factory for CertFactoryBox {
	fn mint(&self, host: &str) -> Result<cert::CertifiedKey, cert::Error> {
		self.0.mint(host)
	}
}
