//! Runtime configuration.
//!
//! Every field has a default so an empty JSON object (or no file at all) is a valid config.
//! Delays are stored in milliseconds on the wire and exposed as [`Duration`]s.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Wait between resolving the focused tab and enabling capture in it, so a freshly
	/// loaded agent has time to start listening.
	pub settle_delay_ms: u64,
	/// Quiescence window of the capture agent's selection reporter.
	pub debounce_ms: u64,
	/// Wait between panel reconnection attempts.
	pub reconnect_delay_ms: u64,
	/// Upper bound for content queries.
	pub query_timeout_ms: u64,
	pub relay: RelayConfig,
	pub completion: CompletionConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			settle_delay_ms: 500,
			debounce_ms: 300,
			reconnect_delay_ms: 1000,
			query_timeout_ms: 5000,
			relay: RelayConfig::default(),
			completion: CompletionConfig::default(),
		}
	}
}

impl Config {
	/// Parses and validates a JSON config document.
	pub fn from_json_str(raw: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(raw)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and validates a JSON config file.
	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path)?;
		Self::from_json_str(&raw)
	}

	pub fn validate(&self) -> Result<()> {
		if self.debounce_ms == 0 {
			return Err(Error::Config("debounceMs must be greater than zero".into()));
		}
		if self.reconnect_delay_ms == 0 {
			return Err(Error::Config(
				"reconnectDelayMs must be greater than zero".into(),
			));
		}
		if self.query_timeout_ms == 0 {
			return Err(Error::Config("queryTimeoutMs must be greater than zero".into()));
		}
		if self.completion.max_attempts == 0 {
			return Err(Error::Config(
				"completion.maxAttempts must be at least 1".into(),
			));
		}
		Ok(())
	}

	pub fn settle_delay(&self) -> Duration {
		Duration::from_millis(self.settle_delay_ms)
	}

	pub fn debounce_window(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn reconnect_delay(&self) -> Duration {
		Duration::from_millis(self.reconnect_delay_ms)
	}

	pub fn query_timeout(&self) -> Duration {
		Duration::from_millis(self.query_timeout_ms)
	}
}

/// Where the relay listens and clients connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
	pub host: String,
	pub port: u16,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			host: selcap_protocol::RELAY_HOST.to_string(),
			port: selcap_protocol::RELAY_PORT,
		}
	}
}

impl RelayConfig {
	/// Base WebSocket URL of the relay, without a path.
	pub fn ws_url(&self) -> String {
		format!("ws://{}:{}", self.host, self.port)
	}

	/// Base HTTP URL of the relay, without a path.
	pub fn http_url(&self) -> String {
		format!("http://{}:{}", self.host, self.port)
	}
}

/// Completion service endpoint and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompletionConfig {
	pub base_url: String,
	pub model: String,
	pub temperature: f32,
	/// Total attempts including the first one.
	pub max_attempts: u32,
	/// Backoff before the second attempt; doubled for each later one.
	pub backoff_ms: u64,
}

impl Default for CompletionConfig {
	fn default() -> Self {
		Self {
			base_url: "https://api.moonshot.cn/v1".to_string(),
			model: "moonshot-v1-8k".to_string(),
			temperature: 0.3,
			max_attempts: 3,
			backoff_ms: 500,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_document_yields_defaults() {
		let config = Config::from_json_str("{}").unwrap();
		assert_eq!(config, Config::default());
		assert_eq!(config.settle_delay(), Duration::from_millis(500));
		assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
	}

	#[test]
	fn partial_document_overrides_only_named_fields() {
		let config =
			Config::from_json_str(r#"{"debounceMs": 50, "relay": {"port": 4000}}"#).unwrap();
		assert_eq!(config.debounce_window(), Duration::from_millis(50));
		assert_eq!(config.relay.port, 4000);
		assert_eq!(config.relay.host, "127.0.0.1");
		assert_eq!(config.query_timeout_ms, 5000);
	}

	#[test]
	fn zero_query_timeout_is_rejected() {
		let err = Config::from_json_str(r#"{"queryTimeoutMs": 0}"#).unwrap_err();
		assert!(matches!(err, Error::Config(_)), "got {err:?}");
	}

	#[test]
	fn load_reads_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(&path, r#"{"settleDelayMs": 0}"#).unwrap();
		let config = Config::load(&path).unwrap();
		assert_eq!(config.settle_delay(), Duration::ZERO);
	}

	#[test]
	fn relay_urls_use_host_and_port() {
		let relay = RelayConfig::default();
		assert_eq!(relay.ws_url(), "ws://127.0.0.1:19989");
		assert_eq!(relay.http_url(), "http://127.0.0.1:19989");
	}
}
