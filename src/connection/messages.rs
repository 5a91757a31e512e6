//! Wire messages exchanged over the wallet websocket.
//!
//! Outbound messages are a serde-tagged enum. Inbound messages are decoded through the codec
//! into a [`Value`] and then classified into a closed [`ServerMessage`] set with a catch-all
//! for types this crate does not know about.

use crate::codec::{self, CodecError, Value};
use serde::Serialize;

pub const CAPABILITY_HISTORY_STREAMING: &str = "history-streaming";

/// Messages the client sends.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
	#[serde(rename = "ping")]
	Ping,
	#[serde(rename = "subscribe_address")]
	SubscribeAddress { address: String },
	#[serde(rename = "unsubscribe_address")]
	UnsubscribeAddress { address: String },
	#[serde(rename = "request:history:xpub")]
	HistoryXpub {
		id: String,
		xpub: String,
		#[serde(rename = "first-index")]
		first_index: u32,
		#[serde(rename = "gap-limit")]
		gap_limit: u32,
	},
	#[serde(rename = "request:history:manual")]
	HistoryManual {
		id: String,
		xpubkey: String,
		first: bool,
		/// `[address, index]` pairs.
		addresses: Vec<(String, u32)>,
		#[serde(rename = "gap-limit")]
		gap_limit: u32,
	},
}

impl ClientMessage {
	pub fn to_text(&self) -> Result<String, CodecError> {
		codec::encode(self)
	}
}

/// One frame of a history stream. Every frame names the stream it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
	pub id: String,
	pub kind: StreamFrameKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrameKind {
	Begin,
	Address { address: String, index: u32 },
	/// Raw vertex payload; decoded by the coordinator with the vertex schema.
	Vertex(Value),
	End,
	Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
	Subscribe,
	Unsubscribe,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
	Pong,
	Capabilities(Vec<String>),
	Stream(StreamFrame),
	/// New or updated transaction touching a subscribed address.
	AddressHistory(Value),
	SubscriptionAck {
		kind: SubscriptionKind,
		success: bool,
		address: Option<String>,
		message: Option<String>,
	},
	DashboardMetrics(Value),
	/// Any other type, forwarded verbatim.
	Other { kind: String, payload: Value },
}

impl ServerMessage {
	/// Classify a decoded message by its `type` field.
	pub fn from_value(value: Value) -> Result<ServerMessage, CodecError> {
		let kind = value
			.message_type()
			.ok_or_else(|| schema_error("type", "string", &value))?
			.to_string();

		if let Some(stream_kind) = kind.strip_prefix("stream:history:") {
			return stream_frame(stream_kind, &kind, value);
		}

		Ok(match kind.as_str() {
			"pong" => ServerMessage::Pong,
			"capabilities" => {
				let list = value
					.get("capabilities")
					.and_then(Value::as_array)
					.ok_or_else(|| schema_error("capabilities", "array", &value))?;
				ServerMessage::Capabilities(
					list.iter()
						.filter_map(Value::as_str)
						.map(str::to_string)
						.collect(),
				)
			}
			"wallet:address_history" => ServerMessage::AddressHistory(value),
			"subscribe_address" | "unsubscribe_address" => ServerMessage::SubscriptionAck {
				kind: if kind == "subscribe_address" {
					SubscriptionKind::Subscribe
				} else {
					SubscriptionKind::Unsubscribe
				},
				success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
				address: value.get("address").and_then(Value::as_str).map(str::to_string),
				message: value.get("message").and_then(Value::as_str).map(str::to_string),
			},
			"dashboard:metrics" => ServerMessage::DashboardMetrics(value),
			_ => ServerMessage::Other {
				kind,
				payload: value,
			},
		})
	}
}

fn stream_frame(stream_kind: &str, kind: &str, mut value: Value) -> Result<ServerMessage, CodecError> {
	let id = value
		.get("id")
		.and_then(Value::as_str)
		.ok_or_else(|| schema_error("id", "stream id", &value))?
		.to_string();

	let frame_kind = match stream_kind {
		"begin" => StreamFrameKind::Begin,
		"address" => {
			let address = value
				.get("address")
				.and_then(Value::as_str)
				.ok_or_else(|| schema_error("address", "string", &value))?
				.to_string();
			let index = value
				.get("index")
				.and_then(Value::as_u64)
				.and_then(|i| u32::try_from(i).ok())
				.ok_or_else(|| schema_error("index", "address index", &value))?;
			StreamFrameKind::Address { address, index }
		}
		"vertex" => {
			let data = match value.get_mut("data") {
				Some(data) => std::mem::replace(data, Value::Null),
				None => return Err(schema_error("data", "vertex object", &value)),
			};
			StreamFrameKind::Vertex(data)
		}
		"end" => StreamFrameKind::End,
		"error" => StreamFrameKind::Error(
			value
				.get("errmsg")
				.and_then(Value::as_str)
				.unwrap_or("unknown stream error")
				.to_string(),
		),
		_ => {
			return Ok(ServerMessage::Other {
				kind: kind.to_string(),
				payload: value,
			});
		}
	};

	Ok(ServerMessage::Stream(StreamFrame {
		id,
		kind: frame_kind,
	}))
}

fn schema_error(path: &str, expected: &'static str, value: &Value) -> CodecError {
	CodecError::Schema {
		path: path.to_string(),
		expected,
		raw: codec::stringify(value),
	}
}

/// How the dispatch topic is derived from a message's `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRule {
	/// The whole `type` value.
	FullType,
	/// The segment before the first `:` (`wallet:address_history` -> `wallet`).
	TypePrefix,
}

/// Which decoder turns frame text into a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadDecoder {
	/// Precision-preserving codec.
	Precise,
	/// Plain JSON; integers outside `i64` degrade to floats.
	Standard,
}

/// Per-connection dispatch behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStrategy {
	pub topic: TopicRule,
	pub decoder: PayloadDecoder,
}

impl DispatchStrategy {
	/// Wallet connections: prefix topics, precise decoding.
	pub fn wallet() -> Self {
		Self {
			topic: TopicRule::TypePrefix,
			decoder: PayloadDecoder::Precise,
		}
	}

	/// Atomic-swap service connections: full-type topics, standard decoding.
	pub fn atomic_swap() -> Self {
		Self {
			topic: TopicRule::FullType,
			decoder: PayloadDecoder::Standard,
		}
	}

	pub fn decode(&self, text: &str) -> Result<Value, CodecError> {
		match self.decoder {
			PayloadDecoder::Precise => codec::parse(text),
			PayloadDecoder::Standard => serde_json::from_str::<serde_json::Value>(text)
				.map(Value::from_standard_json)
				.map_err(|source| CodecError::Malformed {
					raw: text.chars().take(256).collect(),
					source,
				}),
		}
	}

	pub fn topic(&self, value: &Value) -> String {
		let kind = value.message_type().unwrap_or_default();
		match self.topic {
			TopicRule::FullType => kind.to_string(),
			TopicRule::TypePrefix => kind.split(':').next().unwrap_or_default().to_string(),
		}
	}
}

impl Default for DispatchStrategy {
	fn default() -> Self {
		Self::wallet()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse_message(text: &str) -> ServerMessage {
		ServerMessage::from_value(codec::parse(text).unwrap()).unwrap()
	}

	#[test]
	fn client_messages_match_the_wire_format() {
		let ping = ClientMessage::Ping.to_text().unwrap();
		assert_eq!(ping, r#"{"type":"ping"}"#);

		let xpub = ClientMessage::HistoryXpub {
			id: "abc".into(),
			xpub: "xpub6C".into(),
			first_index: 0,
			gap_limit: 20,
		};
		let value = codec::parse(&xpub.to_text().unwrap()).unwrap();
		assert_eq!(value.message_type(), Some("request:history:xpub"));
		assert_eq!(value.get("first-index").and_then(Value::as_u64), Some(0));
		assert_eq!(value.get("gap-limit").and_then(Value::as_u64), Some(20));

		let manual = ClientMessage::HistoryManual {
			id: "abc".into(),
			xpubkey: "xpub6C".into(),
			first: true,
			addresses: vec![("WZ7pDnkPnxbs14GHdUFivFzPbzitwNtvZo".into(), 3)],
			gap_limit: 20,
		};
		let text = manual.to_text().unwrap();
		assert!(text.contains(r#""addresses":[["WZ7pDnkPnxbs14GHdUFivFzPbzitwNtvZo",3]]"#));
		assert!(text.contains(r#""first":true"#));
	}

	#[test]
	fn classifies_stream_frames() {
		let frame = parse_message(
			r#"{"id":"s1","type":"stream:history:address","address":"WZ7p","index":4}"#,
		);
		assert_eq!(
			frame,
			ServerMessage::Stream(StreamFrame {
				id: "s1".into(),
				kind: StreamFrameKind::Address {
					address: "WZ7p".into(),
					index: 4
				},
			})
		);

		let error = parse_message(r#"{"id":"s1","type":"stream:history:error","errmsg":"boom"}"#);
		assert!(matches!(
			error,
			ServerMessage::Stream(StreamFrame { kind: StreamFrameKind::Error(ref m), .. }) if m == "boom"
		));
	}

	#[test]
	fn stream_frames_require_an_id() {
		let value = codec::parse(r#"{"type":"stream:history:begin"}"#).unwrap();
		assert!(matches!(
			ServerMessage::from_value(value),
			Err(CodecError::Schema { ref path, .. }) if path == "id"
		));
	}

	#[test]
	fn unknown_types_fall_through() {
		let message = parse_message(r#"{"type":"network:new_tx_accepted","tx_id":"00ab"}"#);
		match message {
			ServerMessage::Other { kind, payload } => {
				assert_eq!(kind, "network:new_tx_accepted");
				assert_eq!(payload.get("tx_id").and_then(Value::as_str), Some("00ab"));
			}
			other => panic!("unexpected message: {other:?}"),
		}
	}

	#[test]
	fn strategy_topics_and_decoders() {
		let value = codec::parse(r#"{"type":"wallet:address_history","value":12345678901234567890}"#)
			.unwrap();
		assert_eq!(DispatchStrategy::wallet().topic(&value), "wallet");
		assert_eq!(
			DispatchStrategy::atomic_swap().topic(&value),
			"wallet:address_history"
		);

		let text = r#"{"type":"x","value":12345678901234567890}"#;
		let precise = DispatchStrategy::wallet().decode(text).unwrap();
		assert_eq!(
			precise.get("value").and_then(Value::as_amount).map(|a| a.to_string()),
			Some("12345678901234567890".to_string())
		);
		let standard = DispatchStrategy::atomic_swap().decode(text).unwrap();
		assert!(matches!(standard.get("value"), Some(Value::Float(_))));
	}
}
