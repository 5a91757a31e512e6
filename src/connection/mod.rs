//! Wallet websocket connection.
//!
//! A [`Connection`] owns one logical connection to a wallet server: the socket actor that keeps
//! the physical websocket alive, capability negotiation for each new socket, and routing of
//! history stream frames to the stream coordinator. Everything else the server sends is
//! republished as typed [`ConnectionEvent`]s.

/// Capability negotiation on the first server message
mod capabilities;
/// Connection configuration
mod config;
/// Wallet-facing connection handle
mod facade;
/// Wire message model and dispatch strategies
mod messages;
/// Socket actor: heartbeat, reconnection, online flag
mod socket;
/// Physical transport abstraction
mod transport;
/// Shared connection types and errors
mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use capabilities::CapabilityNegotiator;
pub use config::{ConnectionConfig, ServerUrl};
pub use facade::Connection;
pub use messages::{
	CAPABILITY_HISTORY_STREAMING, ClientMessage, DispatchStrategy, PayloadDecoder, ServerMessage,
	StreamFrame, StreamFrameKind, SubscriptionKind, TopicRule,
};
pub use transport::{Connector, Frame, FrameReader, FrameWriter, SocketParts, TungsteniteConnector};
pub use types::*;
