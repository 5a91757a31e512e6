//! Types for the history streaming protocol

use crate::codec::{Amount, CodecError, Schema};
use crate::connection::ConnectionError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Token uid of the native token.
pub const NATIVE_TOKEN_UID: &str = "00";

/// Correlation token for one history transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(String);

impl StreamId {
	/// Fresh random id: 16 random bytes, hex encoded.
	pub fn generate() -> Self {
		let mut bytes = [0u8; 16];
		rand::rng().fill(&mut bytes);
		Self(hex::encode(bytes))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for StreamId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for StreamId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
	/// The server derives addresses from the xpub.
	Xpub,
	/// The client sends explicit address batches.
	Manual,
}

/// Parameters of a history stream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
	Xpub {
		xpub: String,
		first_index: u32,
		gap_limit: u32,
	},
	/// First page of a manually paginated scan.
	Manual {
		xpub: String,
		addresses: Vec<AddressRecord>,
		gap_limit: u32,
	},
}

impl StreamRequest {
	pub fn mode(&self) -> StreamMode {
		match self {
			StreamRequest::Xpub { .. } => StreamMode::Xpub,
			StreamRequest::Manual { .. } => StreamMode::Manual,
		}
	}
}

/// Lifecycle of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
	Pending,
	Begun,
	Active,
	Ended,
	Errored,
	Aborted,
}

impl StreamStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			StreamStatus::Ended | StreamStatus::Errored | StreamStatus::Aborted
		)
	}
}

impl fmt::Display for StreamStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			StreamStatus::Pending => "PENDING",
			StreamStatus::Begun => "BEGUN",
			StreamStatus::Active => "ACTIVE",
			StreamStatus::Ended => "ENDED",
			StreamStatus::Errored => "ERRORED",
			StreamStatus::Aborted => "ABORTED",
		};
		f.write_str(name)
	}
}

/// One wallet address and its derivation index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
	pub address: String,
	pub index: u32,
}

impl AddressRecord {
	pub fn new(address: impl Into<String>, index: u32) -> Self {
		Self {
			address: address.into(),
			index,
		}
	}
}

/// Decoded output script data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedScript {
	#[serde(default)]
	pub address: Option<String>,
	#[serde(default)]
	pub timelock: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
	/// Transaction holding the spent output.
	pub tx_id: String,
	pub index: u32,
	pub value: Amount,
	#[serde(default = "native_token")]
	pub token: String,
	#[serde(default)]
	pub decoded: DecodedScript,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
	pub value: Amount,
	#[serde(default = "native_token")]
	pub token: String,
	#[serde(default)]
	pub decoded: DecodedScript,
	#[serde(default)]
	pub spent_by: Option<String>,
}

/// A transaction or block as delivered by history streams and polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
	pub tx_id: String,
	#[serde(default)]
	pub version: u32,
	#[serde(default)]
	pub timestamp: u64,
	#[serde(default)]
	pub is_voided: bool,
	#[serde(default)]
	pub inputs: Vec<TxInput>,
	#[serde(default)]
	pub outputs: Vec<TxOutput>,
	#[serde(default)]
	pub height: Option<u64>,
}

impl Vertex {
	/// Amount fields of a vertex payload.
	pub fn schema() -> Schema {
		Schema::new()
			.amount("inputs.*.value")
			.amount("outputs.*.value")
	}
}

fn native_token() -> String {
	NATIVE_TOKEN_UID.to_string()
}

/// Result of a stream that reached its end frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
	pub id: StreamId,
	pub mode: StreamMode,
	pub addresses: usize,
	pub vertices: usize,
}

/// What a stream handle yields, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
	Address(AddressRecord),
	Vertex(Box<Vertex>),
	/// Last item of a session.
	Finished(Result<StreamSummary, StreamError>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
	#[error("history streaming was not negotiated on this connection")]
	StreamingUnavailable,

	#[error("stream {0} is still active")]
	SessionActive(StreamId),

	#[error("no active stream session")]
	NoActiveSession,

	#[error("stream {0} is not a manual stream")]
	NotManual(StreamId),

	#[error("server stream error: {0}")]
	Server(String),

	#[error("connection lost during stream")]
	ConnectionLost,

	#[error("failed to decode vertex: {0}")]
	Decode(String),

	#[error("connection error: {0}")]
	Connection(String),
}

impl From<CodecError> for StreamError {
	fn from(err: CodecError) -> Self {
		StreamError::Decode(err.to_string())
	}
}

impl From<ConnectionError> for StreamError {
	fn from(err: ConnectionError) -> Self {
		StreamError::Connection(err.to_string())
	}
}

/// Receiving side of a stream session.
///
/// Yields [`StreamItem`]s until the session finishes. A handle whose session was aborted never
/// yields again; callers bound their waits with a timeout.
#[derive(Debug)]
pub struct StreamHandle {
	id: StreamId,
	items: mpsc::UnboundedReceiver<StreamItem>,
}

impl StreamHandle {
	pub(crate) fn new(id: StreamId, items: mpsc::UnboundedReceiver<StreamItem>) -> Self {
		Self { id, items }
	}

	pub fn id(&self) -> &StreamId {
		&self.id
	}

	/// Next item of the session.
	pub async fn next(&mut self) -> StreamItem {
		match self.items.recv().await {
			Some(item) => item,
			None => std::future::pending().await,
		}
	}

	/// Non-blocking variant of [`next`](Self::next).
	pub fn try_next(&mut self) -> Option<StreamItem> {
		self.items.try_recv().ok()
	}
}
