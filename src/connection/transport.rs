//! Physical websocket transport.
//!
//! The socket actor never touches `tokio-tungstenite` directly: it asks a [`Connector`] for a
//! writer/reader pair. Production code uses [`TungsteniteConnector`]; tests plug in an
//! in-memory connector.

use super::types::TransportError;
use futures::stream::BoxStream;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Application-level frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
	Text(String),
	/// The peer closed the socket.
	Close,
}

/// Inbound half of an open socket.
pub type FrameReader = BoxStream<'static, Result<Frame, TransportError>>;

/// Outbound half of an open socket.
#[async_trait::async_trait]
pub trait FrameWriter: Send {
	/// Whether the transport can take a frame right now.
	fn is_ready(&self) -> bool {
		true
	}

	async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

	/// Close the socket. Must be safe to call on an already closed socket.
	async fn close(&mut self);
}

/// Both halves of a freshly opened socket.
pub struct SocketParts {
	pub writer: Box<dyn FrameWriter>,
	pub reader: FrameReader,
}

/// Opens physical sockets.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
	async fn connect(&self, url: &str) -> Result<SocketParts, TransportError>;
}

/// `tokio-tungstenite` connector.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

#[async_trait::async_trait]
impl Connector for TungsteniteConnector {
	async fn connect(&self, url: &str) -> Result<SocketParts, TransportError> {
		debug!("Attempting WebSocket connection to: {}", url);
		let (ws_stream, response) = connect_async(url).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);

		let (sink, stream) = ws_stream.split();
		let reader = stream
			.filter_map(|msg| async move {
				match msg {
					Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
					Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
					// Control frames are answered by tungstenite itself.
					Ok(_) => None,
					Err(e) => Some(Err(TransportError::WebSocket(e))),
				}
			})
			.boxed();

		Ok(SocketParts {
			writer: Box::new(TungsteniteWriter { sink, closed: false }),
			reader,
		})
	}
}

struct TungsteniteWriter {
	sink: SplitSink<WsStream, Message>,
	closed: bool,
}

#[async_trait::async_trait]
impl FrameWriter for TungsteniteWriter {
	fn is_ready(&self) -> bool {
		!self.closed
	}

	async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
		if self.closed {
			return Err(TransportError::Closed);
		}
		self.sink.send(Message::Text(text)).await?;
		Ok(())
	}

	async fn close(&mut self) {
		if self.closed {
			return;
		}
		self.closed = true;
		if let Err(e) = self.sink.close().await {
			debug!("Error while closing websocket: {}", e);
		}
	}
}
