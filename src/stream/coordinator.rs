//! Stream session coordinator.
//!
//! Holds at most one live history stream for a connection. Requests carry a freshly generated
//! id, and every inbound frame is matched against the live session's id before it can touch any
//! state: frames for unknown or already discarded sessions are dropped.

use super::types::*;
use crate::codec::Schema;
use crate::connection::{ClientMessage, StreamFrame, StreamFrameKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What the coordinator did with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
	/// No live session has this id.
	Ignored,
	Accepted,
	/// The frame ended the session.
	Finished(StreamStatus),
}

#[derive(Debug)]
struct StreamSession {
	id: StreamId,
	mode: StreamMode,
	status: StreamStatus,
	xpub: String,
	gap_limit: u32,
	addresses: usize,
	vertices: usize,
	items: mpsc::UnboundedSender<StreamItem>,
}

impl StreamSession {
	fn deliver(&self, item: StreamItem) {
		if self.items.send(item).is_err() {
			debug!("Stream {} handle dropped, item discarded", self.id);
		}
	}

	fn summary(&self) -> StreamSummary {
		StreamSummary {
			id: self.id.clone(),
			mode: self.mode,
			addresses: self.addresses,
			vertices: self.vertices,
		}
	}
}

#[derive(Debug)]
pub struct StreamSyncCoordinator {
	session: Option<StreamSession>,
	vertex_schema: Schema,
	last_terminal: Option<(StreamId, StreamStatus)>,
}

impl Default for StreamSyncCoordinator {
	fn default() -> Self {
		Self::new()
	}
}

impl StreamSyncCoordinator {
	pub fn new() -> Self {
		Self {
			session: None,
			vertex_schema: Vertex::schema(),
			last_terminal: None,
		}
	}

	/// Id of the live session, if any.
	pub fn active_id(&self) -> Option<&StreamId> {
		self.session.as_ref().map(|s| &s.id)
	}

	pub fn status(&self) -> Option<StreamStatus> {
		self.session.as_ref().map(|s| s.status)
	}

	/// Id and terminal status of the most recently discarded session.
	pub fn last_terminal(&self) -> Option<&(StreamId, StreamStatus)> {
		self.last_terminal.as_ref()
	}

	/// Open a session and build the request frame that announces it.
	pub fn start(
		&mut self,
		request: StreamRequest,
	) -> Result<(ClientMessage, StreamHandle), StreamError> {
		if let Some(live) = &self.session {
			return Err(StreamError::SessionActive(live.id.clone()));
		}

		let id = StreamId::generate();
		let mode = request.mode();
		let (message, xpub, gap_limit) = match request {
			StreamRequest::Xpub {
				xpub,
				first_index,
				gap_limit,
			} => (
				ClientMessage::HistoryXpub {
					id: id.to_string(),
					xpub: xpub.clone(),
					first_index,
					gap_limit,
				},
				xpub,
				gap_limit,
			),
			StreamRequest::Manual {
				xpub,
				addresses,
				gap_limit,
			} => (
				ClientMessage::HistoryManual {
					id: id.to_string(),
					xpubkey: xpub.clone(),
					first: true,
					addresses: address_pairs(addresses),
					gap_limit,
				},
				xpub,
				gap_limit,
			),
		};

		let (tx, rx) = mpsc::unbounded_channel();
		info!("Starting {:?} history stream {}", mode, id);
		self.session = Some(StreamSession {
			id: id.clone(),
			mode,
			status: StreamStatus::Pending,
			xpub,
			gap_limit,
			addresses: 0,
			vertices: 0,
			items: tx,
		});
		Ok((message, StreamHandle::new(id, rx)))
	}

	/// Request the next page of a manual stream. Never re-declares `first`.
	pub fn manual_batch(&self, addresses: Vec<AddressRecord>) -> Result<ClientMessage, StreamError> {
		let session = self.session.as_ref().ok_or(StreamError::NoActiveSession)?;
		if session.mode != StreamMode::Manual {
			return Err(StreamError::NotManual(session.id.clone()));
		}
		Ok(ClientMessage::HistoryManual {
			id: session.id.to_string(),
			xpubkey: session.xpub.clone(),
			first: false,
			addresses: address_pairs(addresses),
			gap_limit: session.gap_limit,
		})
	}

	/// Caller abort. The session is discarded right away so late frames for it are ignored;
	/// its handle is left without a final item.
	pub fn stop(&mut self) -> Option<StreamId> {
		let mut session = self.session.take()?;
		session.status = StreamStatus::Aborted;
		info!(
			"Aborted history stream {} after {} addresses and {} vertices",
			session.id, session.addresses, session.vertices
		);
		self.last_terminal = Some((session.id.clone(), session.status));
		Some(session.id)
	}

	/// The socket closed under a live session.
	pub fn connection_lost(&mut self) {
		if let Some(session) = self.session.as_ref() {
			warn!(
				"Connection lost during history stream {} ({})",
				session.id, session.status
			);
			self.fail(StreamError::ConnectionLost);
		}
	}

	pub fn handle_frame(&mut self, frame: StreamFrame) -> FrameOutcome {
		let Some(session) = self.session.as_mut() else {
			debug!("Ignoring stream frame for {}: no active stream", frame.id);
			return FrameOutcome::Ignored;
		};
		if session.id.as_str() != frame.id {
			debug!(
				"Ignoring stream frame for {}: active stream is {}",
				frame.id, session.id
			);
			return FrameOutcome::Ignored;
		}

		match frame.kind {
			StreamFrameKind::Begin => {
				if session.status == StreamStatus::Pending {
					session.status = StreamStatus::Begun;
					debug!("History stream {} begun", session.id);
				} else {
					warn!(
						"Duplicate begin for history stream {} in state {}",
						session.id, session.status
					);
				}
				FrameOutcome::Accepted
			}
			StreamFrameKind::Address { address, index } => {
				session.status = StreamStatus::Active;
				session.addresses += 1;
				session.deliver(StreamItem::Address(AddressRecord { address, index }));
				FrameOutcome::Accepted
			}
			StreamFrameKind::Vertex(data) => {
				match self.vertex_schema.decode_value::<Vertex>(data) {
					Ok(vertex) => {
						session.status = StreamStatus::Active;
						session.vertices += 1;
						session.deliver(StreamItem::Vertex(Box::new(vertex)));
						FrameOutcome::Accepted
					}
					Err(e) => {
						error!("Invalid vertex in history stream {}: {}", session.id, e);
						self.fail(e.into())
					}
				}
			}
			StreamFrameKind::End => {
				session.status = StreamStatus::Ended;
				let summary = session.summary();
				info!(
					"History stream {} ended: {} addresses, {} vertices",
					summary.id, summary.addresses, summary.vertices
				);
				session.deliver(StreamItem::Finished(Ok(summary)));
				self.discard()
			}
			StreamFrameKind::Error(message) => {
				error!("History stream {} failed: {}", session.id, message);
				self.fail(StreamError::Server(message))
			}
		}
	}

	fn fail(&mut self, err: StreamError) -> FrameOutcome {
		if let Some(session) = self.session.as_mut() {
			session.status = StreamStatus::Errored;
			session.deliver(StreamItem::Finished(Err(err)));
		}
		self.discard()
	}

	fn discard(&mut self) -> FrameOutcome {
		match self.session.take() {
			Some(session) => {
				self.last_terminal = Some((session.id, session.status));
				FrameOutcome::Finished(session.status)
			}
			None => FrameOutcome::Ignored,
		}
	}
}

fn address_pairs(addresses: Vec<AddressRecord>) -> Vec<(String, u32)> {
	addresses.into_iter().map(|a| (a.address, a.index)).collect()
}
