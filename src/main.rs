//! Binary entry point: parse CLI flags, layer them over an optional YAML
//! config file and built-in defaults, wire up an `Engine` and `Front`, and
//! run until a shutdown signal arrives (§4.9, §4.10).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use wiretrace::cert::{Factory, RcgenFactory};
use wiretrace::{Config, Engine, Front};

#[derive(Parser, Debug)]
#[command(about = "Intercepting HTTP/HTTPS proxy with traffic capture, mock rules, and breakpoints", long_about = None)]
struct Args {
	/// Path to a YAML config file; CLI flags below override its values.
	#[arg(short, long, value_name = "file")]
	config: Option<PathBuf>,

	/// Port the proxy front listens on.
	#[arg(short, long)]
	port: Option<u16>,

	/// Disable HTTPS interception; CONNECT becomes a blind tunnel.
	#[arg(long)]
	no_https: bool,

	/// Directory the SQLite store and any other on-disk state live under.
	#[arg(short, long, value_name = "dir")]
	data_dir: Option<PathBuf>,

	/// PEM-encoded CA certificate used to sign minted leaf certificates.
	/// Required unless `--no-https` is passed; bootstrapping the CA itself
	/// is an external collaborator's job (§1).
	#[arg(long, value_name = "file")]
	ca_cert: Option<PathBuf>,

	/// PEM-encoded CA private key paired with `--ca-cert`.
	#[arg(long, value_name = "file")]
	ca_key: Option<PathBuf>,

	/// `tracing` `EnvFilter` directive string, e.g. "wiretrace=debug,info".
	#[arg(long)]
	log_filter: Option<String>,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
	let mut config = load_config(args.config.as_deref())?;
	if let Some(port) = args.port {
		config.port = port;
	}
	if args.no_https {
		config.enable_https = false;
	}
	if let Some(dir) = args.data_dir {
		config.data_dir = dir;
	}
	if let Some(filter) = &args.log_filter {
		config.log_filter = filter.clone();
	}

	wiretrace_support::telemetry::init(&config.log_filter);
	tracing::info!(port = config.port, enable_https = config.enable_https, "starting wiretrace");

	let cert_factory: Option<Box<dyn Factory>> = if config.enable_https {
		let (ca_cert, ca_key) = resolve_ca_material(&args.ca_cert, &args.ca_key)?;
		Some(Box::new(RcgenFactory::from_pem(&ca_cert, &ca_key)?))
	} else {
		None
	};

	let engine = Engine::new(config, cert_factory).await?;
	let (trigger, watcher) = wiretrace_support::drain::channel();

	let shutdown = tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		tracing::info!("shutdown signal received");
		trigger.signal();
	});

	let front = Front::new(engine);
	front.run(watcher).await?;
	shutdown.abort();
	Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
	match path {
		Some(path) => {
			let contents = std::fs::read_to_string(path)
				.map_err(|e| anyhow::anyhow!("reading config file {path:?}: {e}"))?;
			Ok(serde_yaml::from_str(&contents)?)
		}
		None => Ok(Config::default()),
	}
}

/// The CA bootstrap (key generation, on-disk persistence) is out of core
/// scope per §1; this just reads whatever PEM files the caller already
/// produced.
fn resolve_ca_material(cert: &Option<PathBuf>, key: &Option<PathBuf>) -> anyhow::Result<(String, String)> {
	let cert = cert
		.as_ref()
		.ok_or_else(|| anyhow::anyhow!("--ca-cert is required unless --no-https is passed"))?;
	let key = key
		.as_ref()
		.ok_or_else(|| anyhow::anyhow!("--ca-key is required unless --no-https is passed"))?;
	Ok((std::fs::read_to_string(cert)?, std::fs::read_to_string(key)?))
}
