//! Engine configuration (§6, §4.9). Loaded by the binary from CLI flags and
//! an optional YAML file; the library itself just takes a [`Config`] value
//! so tests can construct one directly without touching the filesystem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_host() -> String {
	"0.0.0.0".to_string()
}

fn default_enable_https() -> bool {
	true
}

fn default_max_request_body() -> usize {
	1024 * 1024
}

fn default_max_response_body() -> usize {
	5 * 1024 * 1024
}

fn default_data_dir() -> PathBuf {
	PathBuf::from(".")
}

fn default_log_filter() -> String {
	"info".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
	/// TCP port the proxy front listens on, bound to all interfaces.
	pub port: u16,

	/// Interface the proxy front binds to (§6 describes the default,
	/// `0.0.0.0`, as listening on all interfaces; any other value narrows
	/// the bind accordingly — `front::Front::bind` uses this value as-is).
	#[serde(default = "default_host")]
	pub host: String,

	/// When `false`, `CONNECT` becomes a blind tunnel with no interception.
	#[serde(default = "default_enable_https")]
	pub enable_https: bool,

	#[serde(default = "default_max_request_body")]
	pub max_request_body_size: usize,

	#[serde(default = "default_max_response_body")]
	pub max_response_body_size: usize,

	/// The SQLite store lives at `<data_dir>/data/traffic.db`.
	#[serde(default = "default_data_dir")]
	pub data_dir: PathBuf,

	/// `EnvFilter` directive string for `tracing`.
	#[serde(default = "default_log_filter")]
	pub log_filter: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			port: 8888,
			host: default_host(),
			enable_https: default_enable_https(),
			max_request_body_size: default_max_request_body(),
			max_response_body_size: default_max_response_body(),
			data_dir: default_data_dir(),
			log_filter: default_log_filter(),
		}
	}
}

impl Config {
	pub fn db_path(&self) -> PathBuf {
		self.data_dir.join("data").join("traffic.db")
	}
}
