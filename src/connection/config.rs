//! Per-connection configuration.

use super::types::ConnectionError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Where the server URL comes from.
#[derive(Clone)]
pub enum ServerUrl {
	Static(String),
	/// Evaluated on every setup, so the URL may change between reconnects.
	Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl ServerUrl {
	/// Resolve the URL; `None` when it is empty.
	pub fn resolve(&self) -> Option<String> {
		let url = match self {
			ServerUrl::Static(url) => url.clone(),
			ServerUrl::Dynamic(provider) => provider(),
		};
		let url = url.trim().to_string();
		if url.is_empty() { None } else { Some(url) }
	}
}

impl fmt::Debug for ServerUrl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ServerUrl::Static(url) => f.debug_tuple("Static").field(url).finish(),
			ServerUrl::Dynamic(_) => f.write_str("Dynamic(..)"),
		}
	}
}

impl From<&str> for ServerUrl {
	fn from(url: &str) -> Self {
		ServerUrl::Static(url.to_string())
	}
}

impl From<String> for ServerUrl {
	fn from(url: String) -> Self {
		ServerUrl::Static(url)
	}
}

/// Connection tuning. Every field has a default and can be overridden per instance.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
	pub url: Option<ServerUrl>,
	/// Period of the application-level ping.
	pub heartbeat_interval: Duration,
	/// How long to wait for a liveness signal after a ping before declaring the socket dead.
	pub connection_timeout: Duration,
	/// Delay between a close and the next connection attempt.
	pub retry_interval: Duration,
	/// Dedup window for setup and upper bound for one open handshake.
	pub open_connection_timeout: Duration,
	/// Delay before retrying a send while the transport is not ready.
	pub message_retry_delay: Duration,
	/// How long to wait for the capability announcement after open.
	pub capabilities_timeout: Duration,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self {
			url: None,
			heartbeat_interval: Duration::from_millis(3_000),
			connection_timeout: Duration::from_millis(5_000),
			retry_interval: Duration::from_millis(1_000),
			open_connection_timeout: Duration::from_millis(20_000),
			message_retry_delay: Duration::from_millis(500),
			capabilities_timeout: Duration::from_millis(5_000),
		}
	}
}

impl ConnectionConfig {
	pub fn new(url: impl Into<ServerUrl>) -> Self {
		Self {
			url: Some(url.into()),
			..Self::default()
		}
	}

	/// Load from environment with defaults
	pub fn from_env() -> Self {
		let mut config = Self::default();

		if let Ok(url) = std::env::var("WALLET_WS_URL") {
			config.url = Some(ServerUrl::Static(url));
		}
		if let Some(ms) = env_millis("WALLET_WS_HEARTBEAT_MS") {
			config.heartbeat_interval = ms;
		}
		if let Some(ms) = env_millis("WALLET_WS_CONNECTION_TIMEOUT_MS") {
			config.connection_timeout = ms;
		}
		if let Some(ms) = env_millis("WALLET_WS_RETRY_MS") {
			config.retry_interval = ms;
		}
		if let Some(ms) = env_millis("WALLET_WS_OPEN_TIMEOUT_MS") {
			config.open_connection_timeout = ms;
		}

		config
	}

	pub fn with_url(mut self, url: impl Into<ServerUrl>) -> Self {
		self.url = Some(url.into());
		self
	}

	pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
		self.heartbeat_interval = interval;
		self
	}

	pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
		self.connection_timeout = timeout;
		self
	}

	pub fn with_retry_interval(mut self, interval: Duration) -> Self {
		self.retry_interval = interval;
		self
	}

	pub fn with_open_connection_timeout(mut self, timeout: Duration) -> Self {
		self.open_connection_timeout = timeout;
		self
	}

	pub fn with_capabilities_timeout(mut self, timeout: Duration) -> Self {
		self.capabilities_timeout = timeout;
		self
	}

	/// Reject durations the socket actor cannot run with.
	pub(crate) fn validate(&self) -> Result<(), ConnectionError> {
		let required = [
			("heartbeat_interval", self.heartbeat_interval),
			("connection_timeout", self.connection_timeout),
			("retry_interval", self.retry_interval),
			("open_connection_timeout", self.open_connection_timeout),
			("message_retry_delay", self.message_retry_delay),
		];
		match required.iter().find(|(_, d)| d.is_zero()) {
			Some((name, _)) => Err(ConnectionError::InvalidConfig(name)),
			None => Ok(()),
		}
	}

	pub(crate) fn resolve_url(&self) -> Option<String> {
		self.url.as_ref().and_then(ServerUrl::resolve)
	}
}

fn env_millis(name: &str) -> Option<Duration> {
	std::env::var(name)
		.ok()
		.and_then(|v| v.parse::<u64>().ok())
		.filter(|ms| *ms > 0)
		.map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[test]
	fn dynamic_url_is_evaluated_on_every_resolve() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let url = ServerUrl::Dynamic(Arc::new(move || {
			let n = counter.fetch_add(1, Ordering::SeqCst);
			format!("ws://node-{}.local/v1a/ws/", n)
		}));

		assert_eq!(url.resolve().as_deref(), Some("ws://node-0.local/v1a/ws/"));
		assert_eq!(url.resolve().as_deref(), Some("ws://node-1.local/v1a/ws/"));
	}

	#[test]
	fn zero_durations_are_rejected() {
		let config = ConnectionConfig::new("ws://node.local/v1a/ws/");
		assert!(config.validate().is_ok());
		assert!(matches!(
			config.clone().with_heartbeat_interval(Duration::ZERO).validate(),
			Err(ConnectionError::InvalidConfig("heartbeat_interval"))
		));
		assert!(matches!(
			config.with_retry_interval(Duration::ZERO).validate(),
			Err(ConnectionError::InvalidConfig("retry_interval"))
		));
	}

	#[test]
	fn blank_url_does_not_resolve() {
		let config = ConnectionConfig::new("   ");
		assert!(config.resolve_url().is_none());
		assert!(ConnectionConfig::default().resolve_url().is_none());
	}
}
