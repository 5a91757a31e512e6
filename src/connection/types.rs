//! Types shared by the connection socket and the connection facade.

use crate::codec::CodecError;
use std::fmt;
use std::time::Duration;

use super::messages::ServerMessage;

/// Wallet-facing connection state.
///
/// Changes only on `start()`, on a successful open and on terminal close; transient drops
/// are reported through the online flag instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Closed,
	Connecting,
	Connected,
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Closed => write!(f, "CLOSED"),
			Self::Connecting => write!(f, "CONNECTING"),
			Self::Connected => write!(f, "CONNECTED"),
		}
	}
}

/// How history is retrieved on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
	/// The server advertised the streaming-history capability.
	Streaming,
	/// No capability announcement, or streaming not advertised.
	Polling,
}

/// Events published to everything that listens on a connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
	State(ConnectionState),
	Online(bool),
	Pong {
		rtt: Duration,
	},
	/// Outcome of capability negotiation for the current socket.
	Capabilities(HistoryMode),
	/// Transient connectivity failure; reconnection is already scheduled.
	ConnectionError(String),
	/// A message from the server that is not handled by the core.
	Message {
		/// Dispatch topic derived by the connection's dispatch strategy.
		topic: String,
		message: ServerMessage,
	},
	/// A frame that could not be decoded.
	ProtocolError(String),
}

/// Low-level transport failures. Always recovered through reconnection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
	#[error("WebSocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("connection attempt timed out after {0:?}")]
	OpenTimeout(Duration),

	#[error("socket closed")]
	Closed,

	#[error("transport error: {0}")]
	Other(String),
}

/// Configuration and usage errors, raised at the call site and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
	#[error("websocket not initialized: no connector configured")]
	NotInitialized,

	#[error("no server URL configured")]
	MissingUrl,

	#[error("connection already started")]
	AlreadyStarted,

	#[error("invalid connection config: {0} must be greater than zero")]
	InvalidConfig(&'static str),

	#[error("start() must be called from within a tokio runtime")]
	NoRuntime,

	#[error("connection is not running")]
	NotRunning,

	#[error("codec error: {0}")]
	Codec(#[from] CodecError),
}
