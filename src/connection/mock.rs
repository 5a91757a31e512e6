//! In-memory transport for tests.

use super::transport::{Connector, Frame, FrameWriter, SocketParts};
use super::types::TransportError;
use crate::codec::{self, Value};
use futures::channel::mpsc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Connector whose sockets are driven by the test through [`MockServer`] handles.
#[derive(Clone)]
pub(crate) struct MockConnector {
	servers: Arc<Mutex<mpsc::UnboundedSender<MockServer>>>,
	attempts: Arc<AtomicUsize>,
	refuse: Arc<AtomicBool>,
	stall: Arc<AtomicBool>,
}

/// Server side of one mock socket.
pub(crate) struct MockServer {
	to_client: mpsc::UnboundedSender<Result<Frame, TransportError>>,
	from_client: mpsc::UnboundedReceiver<String>,
	pub(crate) ready: Arc<AtomicBool>,
	pub(crate) closed: Arc<AtomicBool>,
}

impl MockConnector {
	pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
		let (tx, rx) = mpsc::unbounded();
		(
			Self {
				servers: Arc::new(Mutex::new(tx)),
				attempts: Arc::new(AtomicUsize::new(0)),
				refuse: Arc::new(AtomicBool::new(false)),
				stall: Arc::new(AtomicBool::new(false)),
			},
			rx,
		)
	}

	pub(crate) fn attempts(&self) -> usize {
		self.attempts.load(Ordering::SeqCst)
	}

	pub(crate) fn set_refuse(&self, refuse: bool) {
		self.refuse.store(refuse, Ordering::SeqCst);
	}

	pub(crate) fn set_stall(&self, stall: bool) {
		self.stall.store(stall, Ordering::SeqCst);
	}
}

#[async_trait::async_trait]
impl Connector for MockConnector {
	async fn connect(&self, _url: &str) -> Result<SocketParts, TransportError> {
		self.attempts.fetch_add(1, Ordering::SeqCst);
		if self.stall.load(Ordering::SeqCst) {
			futures::future::pending::<()>().await;
		}
		if self.refuse.load(Ordering::SeqCst) {
			return Err(TransportError::Other("connection refused".to_string()));
		}

		let (to_client, reader) = mpsc::unbounded();
		let (writer_tx, from_client) = mpsc::unbounded();
		let ready = Arc::new(AtomicBool::new(true));
		let closed = Arc::new(AtomicBool::new(false));

		let server = MockServer {
			to_client,
			from_client,
			ready: ready.clone(),
			closed: closed.clone(),
		};
		self.servers
			.lock()
			.unbounded_send(server)
			.map_err(|_| TransportError::Other("test dropped the server receiver".into()))?;

		Ok(SocketParts {
			writer: Box::new(MockWriter {
				tx: writer_tx,
				ready,
				closed,
			}),
			reader: reader.boxed(),
		})
	}
}

struct MockWriter {
	tx: mpsc::UnboundedSender<String>,
	ready: Arc<AtomicBool>,
	closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl FrameWriter for MockWriter {
	fn is_ready(&self) -> bool {
		self.ready.load(Ordering::SeqCst)
	}

	async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
		self.tx
			.unbounded_send(text)
			.map_err(|_| TransportError::Closed)
	}

	async fn close(&mut self) {
		self.closed.store(true, Ordering::SeqCst);
		self.tx.close_channel();
	}
}

impl MockServer {
	/// Push a text frame to the client.
	pub(crate) fn send(&self, text: &str) {
		let _ = self.to_client.unbounded_send(Ok(Frame::Text(text.to_string())));
	}

	pub(crate) fn send_value(&self, value: &Value) {
		self.send(&codec::stringify(value));
	}

	pub(crate) fn send_error(&self, message: &str) {
		let _ = self
			.to_client
			.unbounded_send(Err(TransportError::Other(message.to_string())));
	}

	/// Peer-initiated close.
	pub(crate) fn close(&self) {
		let _ = self.to_client.unbounded_send(Ok(Frame::Close));
	}

	/// Next frame the client wrote, decoded.
	pub(crate) async fn recv(&mut self) -> Option<Value> {
		let text = self.from_client.next().await?;
		codec::parse(&text).ok()
	}

	/// Next client frame whose type is not `ping`.
	pub(crate) async fn recv_non_ping(&mut self) -> Option<Value> {
		loop {
			let value = self.recv().await?;
			if value.message_type() != Some("ping") {
				return Some(value);
			}
		}
	}

	/// Frames written so far without waiting.
	pub(crate) fn drain(&mut self) -> Vec<Value> {
		let mut out = Vec::new();
		while let Ok(Some(text)) = self.from_client.try_next() {
			if let Ok(value) = codec::parse(&text) {
				out.push(value);
			}
		}
		out
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

/// Let spawned tasks run until they block, without advancing the paused clock.
pub(crate) async fn settle() {
	for _ in 0..16 {
		tokio::task::yield_now().await;
	}
}

/// Advance the paused clock and let tasks observe it.
pub(crate) async fn advance(duration: Duration) {
	tokio::time::advance(duration).await;
	settle().await;
}
