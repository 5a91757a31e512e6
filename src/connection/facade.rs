//! Wallet-facing connection handle.
//!
//! [`Connection`] is the composition root of the connection layer. `start()` spawns two tasks:
//! the socket actor, which owns the physical websocket, and an event pump, which consumes the
//! actor's events in order, negotiates capabilities for every new socket, routes history
//! stream frames to the [`StreamSyncCoordinator`] and republishes everything else as
//! [`ConnectionEvent`]s on a broadcast channel.

use super::capabilities::CapabilityNegotiator;
use super::config::ConnectionConfig;
use super::messages::{ClientMessage, DispatchStrategy, ServerMessage};
use super::socket::{Outbox, SocketEvent, SocketHandle, poll_slot};
use super::transport::{Connector, TungsteniteConnector};
use super::types::{ConnectionError, ConnectionEvent, ConnectionState, HistoryMode};
use crate::stream::{
	AddressRecord, StreamError, StreamHandle, StreamId, StreamRequest, StreamStatus,
	StreamSyncCoordinator,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep, timeout};
use tracing::{debug, error, info};

const EVENT_CAPACITY: usize = 256;

/// State shared between the handle and its event pump.
struct Shared {
	state: watch::Sender<ConnectionState>,
	online: watch::Sender<bool>,
	history_mode: watch::Sender<Option<HistoryMode>>,
	events: broadcast::Sender<ConnectionEvent>,
	streams: Mutex<StreamSyncCoordinator>,
	addresses: Mutex<BTreeSet<String>>,
}

impl Shared {
	fn new() -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			state: watch::Sender::new(ConnectionState::Closed),
			online: watch::Sender::new(false),
			history_mode: watch::Sender::new(None),
			events,
			streams: Mutex::new(StreamSyncCoordinator::new()),
			addresses: Mutex::new(BTreeSet::new()),
		}
	}

	fn emit(&self, event: ConnectionEvent) {
		// No subscribers is fine.
		let _ = self.events.send(event);
	}

	fn set_state(&self, state: ConnectionState) {
		let changed = self.state.send_if_modified(|current| {
			if *current == state {
				false
			} else {
				*current = state;
				true
			}
		});
		if changed {
			info!("Connection state: {}", state);
			self.emit(ConnectionEvent::State(state));
		}
	}
}

struct Running {
	socket: SocketHandle,
	pump: JoinHandle<()>,
}

/// One logical connection to a wallet server.
pub struct Connection {
	config: ConnectionConfig,
	strategy: DispatchStrategy,
	connector: Option<Arc<dyn Connector>>,
	shared: Arc<Shared>,
	running: Mutex<Option<Running>>,
}

impl Connection {
	/// Connection with the wallet dispatch strategy and no transport yet.
	pub fn new(config: ConnectionConfig) -> Self {
		Self {
			config,
			strategy: DispatchStrategy::wallet(),
			connector: None,
			shared: Arc::new(Shared::new()),
			running: Mutex::new(None),
		}
	}

	/// Connection over `tokio-tungstenite`.
	pub fn websocket(config: ConnectionConfig) -> Self {
		Self::new(config).with_connector(Arc::new(TungsteniteConnector))
	}

	pub fn with_strategy(mut self, strategy: DispatchStrategy) -> Self {
		self.strategy = strategy;
		self
	}

	pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
		self.connector = Some(connector);
		self
	}

	pub fn set_connector(&mut self, connector: Arc<dyn Connector>) {
		self.connector = Some(connector);
	}

	pub fn config(&self) -> &ConnectionConfig {
		&self.config
	}

	/// Start connecting. Returns once the socket actor is running; the state is `Connecting`
	/// until the first open.
	///
	/// Must be called from within a tokio runtime: both connection tasks are spawned on it.
	pub fn start(&self) -> Result<(), ConnectionError> {
		let connector = self.connector.clone().ok_or(ConnectionError::NotInitialized)?;
		if self.config.resolve_url().is_none() {
			return Err(ConnectionError::MissingUrl);
		}
		self.config.validate()?;
		Handle::try_current().map_err(|_| ConnectionError::NoRuntime)?;

		let mut running = self.running.lock();
		if running.is_some() {
			return Err(ConnectionError::AlreadyStarted);
		}

		self.shared.set_state(ConnectionState::Connecting);

		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let socket = SocketHandle::spawn(self.config.clone(), connector, events_tx);
		let pump = EventPump {
			shared: self.shared.clone(),
			strategy: self.strategy,
			outbox: socket.outbox().clone(),
			negotiator: CapabilityNegotiator::new(),
			capabilities_timeout: self.config.capabilities_timeout,
			capabilities_deadline: None,
			socket_events: events_rx,
		};
		let pump = tokio::spawn(pump.run());

		*running = Some(Running { socket, pump });
		Ok(())
	}

	/// Terminal shutdown. Safe to call repeatedly.
	pub async fn stop(&self) {
		let running = self.running.lock().take();
		if let Some(Running { socket, pump }) = running {
			socket.close().await;
			if let Err(e) = pump.await {
				if e.is_panic() {
					error!("Connection event pump panicked: {}", e);
				}
			}
		}
		self.shared.set_state(ConnectionState::Closed);
	}

	pub fn state(&self) -> ConnectionState {
		*self.shared.state.borrow()
	}

	pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
		self.shared.state.subscribe()
	}

	pub fn is_online(&self) -> bool {
		*self.shared.online.borrow()
	}

	pub fn watch_online(&self) -> watch::Receiver<bool> {
		self.shared.online.subscribe()
	}

	/// Subscribe to connection events.
	pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
		self.shared.events.subscribe()
	}

	/// History mode negotiated on the current socket, if decided yet.
	pub fn history_mode(&self) -> Option<HistoryMode> {
		*self.shared.history_mode.borrow()
	}

	/// Wait until the current socket has negotiated a history mode.
	pub async fn wait_history_mode(&self, limit: Duration) -> Option<HistoryMode> {
		let mut rx = self.shared.history_mode.subscribe();
		let mode = match timeout(limit, rx.wait_for(Option::is_some)).await {
			Ok(Ok(mode)) => *mode,
			_ => None,
		};
		mode
	}

	/// Send a message. Dropped silently while the socket is offline.
	pub fn send(&self, message: &ClientMessage) -> Result<(), ConnectionError> {
		self.outbox()?.send(message)
	}

	/// Track an address. It is subscribed now if running and again after every reconnect.
	pub fn subscribe_address(&self, address: &str) -> Result<(), ConnectionError> {
		self.shared.addresses.lock().insert(address.to_string());
		match self.outbox() {
			Ok(outbox) => outbox.send(&ClientMessage::SubscribeAddress {
				address: address.to_string(),
			}),
			Err(_) => Ok(()),
		}
	}

	pub fn unsubscribe_address(&self, address: &str) -> Result<(), ConnectionError> {
		self.shared.addresses.lock().remove(address);
		match self.outbox() {
			Ok(outbox) => outbox.send(&ClientMessage::UnsubscribeAddress {
				address: address.to_string(),
			}),
			Err(_) => Ok(()),
		}
	}

	pub fn subscribed_addresses(&self) -> Vec<String> {
		self.shared.addresses.lock().iter().cloned().collect()
	}

	/// Open a history stream. Only available when the socket negotiated streaming.
	pub fn start_stream(&self, request: StreamRequest) -> Result<StreamHandle, StreamError> {
		if self.history_mode() != Some(HistoryMode::Streaming) {
			return Err(StreamError::StreamingUnavailable);
		}
		let outbox = self.outbox()?;

		let mut streams = self.shared.streams.lock();
		let (message, handle) = streams.start(request)?;
		if let Err(e) = outbox.send(&message) {
			streams.stop();
			return Err(e.into());
		}
		Ok(handle)
	}

	/// Send the next page of the live manual stream.
	pub fn request_manual_batch(&self, addresses: Vec<AddressRecord>) -> Result<(), StreamError> {
		let outbox = self.outbox()?;
		let message = self.shared.streams.lock().manual_batch(addresses)?;
		outbox.send(&message)?;
		Ok(())
	}

	/// Abort the live stream, if any. Frames that still arrive for it are ignored.
	pub fn stop_stream(&self) -> Option<StreamId> {
		self.shared.streams.lock().stop()
	}

	pub fn stream_status(&self) -> Option<StreamStatus> {
		self.shared.streams.lock().status()
	}

	fn outbox(&self) -> Result<Outbox, ConnectionError> {
		self.running
			.lock()
			.as_ref()
			.map(|r| r.socket.outbox().clone())
			.ok_or(ConnectionError::NotRunning)
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		if let Some(running) = self.running.get_mut().take() {
			running.socket.abort();
			running.pump.abort();
		}
	}
}

/// Consumes socket events in arrival order.
struct EventPump {
	shared: Arc<Shared>,
	strategy: DispatchStrategy,
	outbox: Outbox,
	negotiator: CapabilityNegotiator,
	capabilities_timeout: Duration,
	capabilities_deadline: Option<Pin<Box<Sleep>>>,
	socket_events: mpsc::UnboundedReceiver<SocketEvent>,
}

impl EventPump {
	async fn run(mut self) {
		loop {
			tokio::select! {
				biased;

				event = self.socket_events.recv() => match event {
					Some(event) => {
						if self.on_socket_event(event) {
							break;
						}
					}
					None => break,
				},
				_ = poll_slot(&mut self.capabilities_deadline) => {
					self.capabilities_deadline = None;
					if let Some(mode) = self.negotiator.timeout() {
						self.publish_mode(mode);
					}
				}
			}
		}
		debug!("Connection event pump stopped");
	}

	/// Returns true once the socket is terminally closed.
	fn on_socket_event(&mut self, event: SocketEvent) -> bool {
		match event {
			SocketEvent::Opened => {
				self.negotiator.reset();
				self.capabilities_deadline = Some(Box::pin(sleep(self.capabilities_timeout)));
				self.shared.set_state(ConnectionState::Connected);
				self.resubscribe();
			}
			SocketEvent::Online(online) => {
				self.shared.online.send_replace(online);
				self.shared.emit(ConnectionEvent::Online(online));
			}
			SocketEvent::Pong { rtt } => {
				if let Some(mode) = self.negotiator.observe(&ServerMessage::Pong) {
					self.publish_mode(mode);
				}
				self.shared.emit(ConnectionEvent::Pong { rtt });
			}
			SocketEvent::Message(text) => self.on_message(&text),
			SocketEvent::ConnectionError(message) => {
				self.shared.emit(ConnectionEvent::ConnectionError(message));
			}
			SocketEvent::Closed { terminal } => {
				self.capabilities_deadline = None;
				self.negotiator.reset();
				self.shared.history_mode.send_replace(None);
				self.shared.streams.lock().connection_lost();
				if terminal {
					self.shared.set_state(ConnectionState::Closed);
					return true;
				}
			}
		}
		false
	}

	fn on_message(&mut self, text: &str) {
		let decoded = self.strategy.decode(text).and_then(|value| {
			let topic = self.strategy.topic(&value);
			ServerMessage::from_value(value).map(|message| (topic, message))
		});
		let (topic, message) = match decoded {
			Ok(decoded) => decoded,
			Err(e) => {
				error!("Failed to decode server message: {}", e);
				if let Some(mode) = self.negotiator.observe_undecodable() {
					self.publish_mode(mode);
				}
				self.shared.emit(ConnectionEvent::ProtocolError(e.to_string()));
				return;
			}
		};

		if let Some(mode) = self.negotiator.observe(&message) {
			self.publish_mode(mode);
		}

		match message {
			ServerMessage::Stream(frame) => {
				if self.negotiator.mode() == Some(HistoryMode::Streaming) {
					self.shared.streams.lock().handle_frame(frame);
				} else {
					debug!("Ignoring stream frame {}: streaming not negotiated", frame.id);
				}
			}
			ServerMessage::Capabilities(_) => {}
			message => self.shared.emit(ConnectionEvent::Message { topic, message }),
		}
	}

	fn publish_mode(&mut self, mode: HistoryMode) {
		self.capabilities_deadline = None;
		self.shared.history_mode.send_replace(Some(mode));
		self.shared.emit(ConnectionEvent::Capabilities(mode));
	}

	fn resubscribe(&self) {
		let addresses: Vec<String> = self.shared.addresses.lock().iter().cloned().collect();
		if addresses.is_empty() {
			return;
		}
		debug!("Resubscribing {} addresses", addresses.len());
		for address in addresses {
			if let Err(e) = self.outbox.send(&ClientMessage::SubscribeAddress { address }) {
				error!("Failed to resubscribe address: {}", e);
				break;
			}
		}
	}
}
