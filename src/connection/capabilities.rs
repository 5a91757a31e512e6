//! Capability negotiation.
//!
//! The first message the server sends on a fresh socket decides the history mode for the
//! lifetime of that socket. Only a `capabilities` announcement that lists
//! `history-streaming` enables streaming; anything else, including silence, means polling.

use super::messages::{CAPABILITY_HISTORY_STREAMING, ServerMessage};
use super::types::HistoryMode;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct CapabilityNegotiator {
	mode: Option<HistoryMode>,
	capabilities: Vec<String>,
}

impl CapabilityNegotiator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Forget the previous socket's decision.
	pub fn reset(&mut self) {
		self.mode = None;
		self.capabilities.clear();
	}

	pub fn mode(&self) -> Option<HistoryMode> {
		self.mode
	}

	/// Capabilities captured on the current socket.
	pub fn capabilities(&self) -> &[String] {
		&self.capabilities
	}

	/// Feed a server message. Returns the mode only on the call that decides it.
	pub fn observe(&mut self, message: &ServerMessage) -> Option<HistoryMode> {
		if self.mode.is_some() {
			return None;
		}

		let mode = match message {
			ServerMessage::Capabilities(list) => {
				self.capabilities = list.clone();
				if list.iter().any(|c| c == CAPABILITY_HISTORY_STREAMING) {
					HistoryMode::Streaming
				} else {
					HistoryMode::Polling
				}
			}
			other => {
				debug!("First server message is not a capability announcement: {:?}", other);
				HistoryMode::Polling
			}
		};
		self.decide(mode)
	}

	/// A first frame that could not be decoded counts as "no announcement".
	pub fn observe_undecodable(&mut self) -> Option<HistoryMode> {
		if self.mode.is_some() {
			return None;
		}
		self.decide(HistoryMode::Polling)
	}

	/// Nothing arrived within the capability wait.
	pub fn timeout(&mut self) -> Option<HistoryMode> {
		if self.mode.is_some() {
			return None;
		}
		debug!("No capability announcement received");
		self.decide(HistoryMode::Polling)
	}

	fn decide(&mut self, mode: HistoryMode) -> Option<HistoryMode> {
		info!("History mode negotiated: {:?}", mode);
		self.mode = Some(mode);
		Some(mode)
	}
}
