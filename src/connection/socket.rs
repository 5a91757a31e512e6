//! Connection socket actor.
//!
//! One spawned task owns the physical socket, its runtime record and every timer of a single
//! logical connection. Caller commands, inbound frames and timer expirations are multiplexed
//! with `tokio::select!`, so all state transitions for one connection happen on one task, in
//! arrival order, without locks.
//!
//! The socket knows nothing about the protocol beyond the application-level ping/pong used for
//! liveness. Everything else is forwarded as raw text through [`SocketEvent::Message`].

use super::config::ConnectionConfig;
use super::messages::ClientMessage;
use super::transport::{Connector, Frame, FrameReader, FrameWriter, SocketParts};
use super::types::{ConnectionError, TransportError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep, timeout};
use tracing::{debug, error, info, warn};

/// Events the socket reports to its owner, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SocketEvent {
	/// The open handshake completed.
	Opened,
	/// Edge of the online flag. Never emitted twice with the same value.
	Online(bool),
	Pong { rtt: Duration },
	/// Any non-pong text frame.
	Message(String),
	/// Transient failure; the close path runs right after.
	ConnectionError(String),
	/// The socket was torn down. `terminal` is set only by `close()`.
	Closed { terminal: bool },
}

pub(crate) enum SocketCommand {
	Send(String),
	Close(oneshot::Sender<()>),
}

/// Cloneable sending side of a socket actor.
#[derive(Clone)]
pub(crate) struct Outbox(mpsc::UnboundedSender<SocketCommand>);

impl Outbox {
	/// Queue a raw text frame. Fire-and-forget: the actor drops it when offline.
	pub(crate) fn send_text(&self, text: String) -> Result<(), ConnectionError> {
		self.0
			.send(SocketCommand::Send(text))
			.map_err(|_| ConnectionError::NotRunning)
	}

	pub(crate) fn send(&self, message: &ClientMessage) -> Result<(), ConnectionError> {
		self.send_text(message.to_text()?)
	}
}

/// Caller-side handle to a running socket actor.
pub(crate) struct SocketHandle {
	outbox: Outbox,
	task: JoinHandle<()>,
}

impl SocketHandle {
	/// Spawn the actor and run the first `setup()`.
	pub(crate) fn spawn(
		config: ConnectionConfig,
		connector: Arc<dyn Connector>,
		events: mpsc::UnboundedSender<SocketEvent>,
	) -> Self {
		let (commands, rx) = mpsc::unbounded_channel();
		let actor = SocketActor::new(config, connector, events, rx);
		let task = tokio::spawn(actor.run());
		Self {
			outbox: Outbox(commands),
			task,
		}
	}

	pub(crate) fn outbox(&self) -> &Outbox {
		&self.outbox
	}

	#[cfg(test)]
	pub(crate) fn send_text(&self, text: String) -> Result<(), ConnectionError> {
		self.outbox.send_text(text)
	}

	/// Terminal shutdown. Safe to call on an actor that already exited.
	pub(crate) async fn close(self) {
		let (done, wait) = oneshot::channel();
		if self.outbox.0.send(SocketCommand::Close(done)).is_ok() {
			let _ = wait.await;
		}
		if let Err(e) = self.task.await {
			if e.is_panic() {
				error!("Socket task panicked: {}", e);
			}
		}
	}

	/// Stop the actor without the close path. Used when the owner is dropped.
	pub(crate) fn abort(&self) {
		self.task.abort();
	}
}

/// Per-socket mutable record.
#[derive(Debug, Default)]
pub(crate) struct SocketRuntime {
	/// Setup ran and the socket is listening.
	pub started: bool,
	/// The open handshake completed. Implies `started`.
	pub connected: bool,
	/// Derived liveness flag, optimistic on open.
	pub is_online: bool,
	pub connected_at: Option<DateTime<Utc>>,
	pub last_setup_at: Option<Instant>,
	/// Set while a ping is outstanding.
	pub last_ping_at: Option<Instant>,
	pub last_rtt: Option<Duration>,
}

type Connecting = BoxFuture<'static, Result<SocketParts, TransportError>>;

struct SocketActor {
	config: ConnectionConfig,
	connector: Arc<dyn Connector>,
	events: mpsc::UnboundedSender<SocketEvent>,
	commands: mpsc::UnboundedReceiver<SocketCommand>,
	runtime: SocketRuntime,

	connecting: Option<Connecting>,
	writer: Option<Box<dyn FrameWriter>>,
	reader: Option<FrameReader>,

	heartbeat: Option<Interval>,
	pong_timeout: Option<Pin<Box<Sleep>>>,
	reconnect: Option<Pin<Box<Sleep>>>,
	message_retry: Option<Pin<Box<Sleep>>>,
	/// Frames waiting for the transport to become ready.
	deferred: VecDeque<String>,
}

impl SocketActor {
	fn new(
		config: ConnectionConfig,
		connector: Arc<dyn Connector>,
		events: mpsc::UnboundedSender<SocketEvent>,
		commands: mpsc::UnboundedReceiver<SocketCommand>,
	) -> Self {
		Self {
			config,
			connector,
			events,
			commands,
			runtime: SocketRuntime::default(),
			connecting: None,
			writer: None,
			reader: None,
			heartbeat: None,
			pong_timeout: None,
			reconnect: None,
			message_retry: None,
			deferred: VecDeque::new(),
		}
	}

	async fn run(mut self) {
		if let Err(e) = self.setup().await {
			error!("Websocket setup failed: {}", e);
			self.emit(SocketEvent::ConnectionError(e.to_string()));
		}

		loop {
			tokio::select! {
				biased;

				command = self.commands.recv() => match command {
					Some(SocketCommand::Send(text)) => self.send_message(text).await,
					Some(SocketCommand::Close(done)) => {
						self.close().await;
						let _ = done.send(());
						break;
					}
					None => {
						self.close().await;
						break;
					}
				},
				frame = next_frame(&mut self.reader) => match frame {
					Some(Ok(Frame::Text(text))) => self.on_message(text),
					Some(Ok(Frame::Close)) => {
						info!("Websocket closed by peer");
						self.on_close(true).await;
					}
					Some(Err(e)) => self.on_error(e).await,
					None => {
						info!("Websocket stream ended");
						self.on_close(true).await;
					}
				},
				opened = poll_slot(&mut self.connecting) => {
					self.connecting = None;
					match opened {
						Ok(parts) => self.on_open(parts),
						Err(e) => self.on_error(e).await,
					}
				}
				_ = poll_slot(&mut self.pong_timeout) => {
					self.pong_timeout = None;
					self.on_connection_down().await;
				}
				_ = tick(&mut self.heartbeat) => self.send_ping().await,
				_ = poll_slot(&mut self.message_retry) => {
					self.message_retry = None;
					self.flush_deferred().await;
				}
				_ = poll_slot(&mut self.reconnect) => {
					self.reconnect = None;
					debug!("Reconnecting websocket");
					if let Err(e) = self.setup().await {
						error!("Websocket reconnect aborted: {}", e);
						self.emit(SocketEvent::ConnectionError(e.to_string()));
					}
				}
			}
		}

		debug!("Socket actor stopped");
	}

	fn emit(&self, event: SocketEvent) {
		// The owner going away only happens during shutdown.
		let _ = self.events.send(event);
	}

	/// Begin one connection attempt.
	///
	/// `started` stays set from here until the close path clears it, so a setup while an attempt
	/// is in flight is a no-op. The attempt itself is bounded by `open_connection_timeout`.
	async fn setup(&mut self) -> Result<(), ConnectionError> {
		if self.runtime.started {
			debug!("Skipping setup: a connection attempt is already in flight");
			return Ok(());
		}

		let url = self.config.resolve_url().ok_or(ConnectionError::MissingUrl)?;

		info!("Opening websocket to {}", url);
		let connector = self.connector.clone();
		let limit = self.config.open_connection_timeout;
		self.connecting = Some(Box::pin(async move {
			match timeout(limit, connector.connect(&url)).await {
				Ok(result) => result,
				Err(_) => Err(TransportError::OpenTimeout(limit)),
			}
		}));
		self.runtime.last_setup_at = Some(Instant::now());
		self.runtime.started = true;
		Ok(())
	}

	fn on_open(&mut self, parts: SocketParts) {
		self.writer = Some(parts.writer);
		self.reader = Some(parts.reader);
		self.runtime.connected = true;
		self.runtime.connected_at = Some(Utc::now());
		info!("Websocket connected");

		let period = self.config.heartbeat_interval;
		let mut heartbeat = interval_at(Instant::now() + period, period);
		heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
		self.heartbeat = Some(heartbeat);

		self.set_online(true);
		self.emit(SocketEvent::Opened);
	}

	async fn send_ping(&mut self) {
		if self.pong_timeout.is_some() {
			return;
		}
		self.runtime.last_ping_at = Some(Instant::now());
		self.pong_timeout = Some(Box::pin(sleep(self.config.connection_timeout)));
		match ClientMessage::Ping.to_text() {
			Ok(text) => self.send_message(text).await,
			Err(e) => error!("Failed to encode ping: {}", e),
		}
	}

	fn on_pong(&mut self) {
		if let Some(sent) = self.runtime.last_ping_at.take() {
			let rtt = sent.elapsed();
			self.runtime.last_rtt = Some(rtt);
			self.emit(SocketEvent::Pong { rtt });
		} else {
			self.emit(SocketEvent::Pong {
				rtt: self.runtime.last_rtt.unwrap_or_default(),
			});
		}
		self.pong_timeout = None;
	}

	fn on_message(&mut self, text: String) {
		if is_pong(&text) {
			self.on_pong();
			return;
		}
		// Any traffic from the peer counts as a liveness signal.
		if self.pong_timeout.is_some() {
			self.pong_timeout = Some(Box::pin(sleep(self.config.connection_timeout)));
		}
		self.emit(SocketEvent::Message(text));
	}

	async fn on_connection_down(&mut self) {
		warn!(
			"No liveness signal within {:?}, closing websocket",
			self.config.connection_timeout
		);
		self.on_close(true).await;
	}

	async fn on_error(&mut self, err: TransportError) {
		error!("Websocket error: {}", err);
		self.emit(SocketEvent::ConnectionError(err.to_string()));
		self.on_close(true).await;
	}

	async fn on_close(&mut self, reconnect: bool) {
		self.runtime.started = false;
		self.runtime.connected = false;
		self.runtime.connected_at = None;
		self.set_online(false);
		self.teardown_socket().await;

		self.heartbeat = None;
		self.pong_timeout = None;
		self.runtime.last_ping_at = None;
		self.message_retry = None;
		if !self.deferred.is_empty() {
			debug!("Dropping {} deferred messages", self.deferred.len());
			self.deferred.clear();
		}

		self.emit(SocketEvent::Closed {
			terminal: !reconnect,
		});

		if reconnect {
			debug!(
				"Scheduling reconnect in {:?}",
				self.config.retry_interval
			);
			self.reconnect = Some(Box::pin(sleep(self.config.retry_interval)));
		}
	}

	async fn teardown_socket(&mut self) {
		self.connecting = None;
		self.reader = None;
		if let Some(mut writer) = self.writer.take() {
			writer.close().await;
		}
	}

	fn set_online(&mut self, online: bool) {
		if self.runtime.is_online == online {
			return;
		}
		self.runtime.is_online = online;
		self.emit(SocketEvent::Online(online));
	}

	async fn send_message(&mut self, text: String) {
		if !(self.runtime.started && self.runtime.connected) {
			self.set_online(false);
			debug!("Dropping message while offline");
			return;
		}

		let ready = self.writer.as_ref().is_some_and(|w| w.is_ready());
		if !ready || !self.deferred.is_empty() {
			self.deferred.push_back(text);
			if self.message_retry.is_none() {
				self.message_retry = Some(Box::pin(sleep(self.config.message_retry_delay)));
			}
			return;
		}

		self.send_message_now(text).await;
	}

	async fn flush_deferred(&mut self) {
		let ready = self.writer.as_ref().is_some_and(|w| w.is_ready());
		if !ready {
			if self.runtime.connected {
				self.message_retry = Some(Box::pin(sleep(self.config.message_retry_delay)));
			}
			return;
		}
		while let Some(text) = self.deferred.pop_front() {
			self.send_message_now(text).await;
			if !self.runtime.connected {
				break;
			}
		}
	}

	async fn send_message_now(&mut self, text: String) {
		let result = match self.writer.as_mut() {
			Some(writer) => writer.send_text(text).await,
			None => Err(TransportError::Closed),
		};
		if let Err(e) = result {
			self.on_error(e).await;
		}
	}

	fn has_handle(&self) -> bool {
		self.connecting.is_some() || self.writer.is_some()
	}

	/// Terminal shutdown: tear the socket down and cancel every timer.
	async fn close(&mut self) {
		self.reconnect = None;
		if self.runtime.started || self.has_handle() {
			info!("Closing websocket");
			self.on_close(false).await;
		} else {
			self.heartbeat = None;
			self.pong_timeout = None;
			self.message_retry = None;
			self.deferred.clear();
			self.emit(SocketEvent::Closed { terminal: true });
		}
	}
}

#[derive(Deserialize)]
struct Envelope {
	#[serde(rename = "type", default)]
	kind: Option<String>,
}

fn is_pong(text: &str) -> bool {
	serde_json::from_str::<Envelope>(text)
		.ok()
		.and_then(|envelope| envelope.kind)
		.is_some_and(|kind| kind == "pong")
}

pub(crate) async fn poll_slot<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
	match slot {
		Some(fut) => fut.await,
		None => std::future::pending().await,
	}
}

async fn tick(interval: &mut Option<Interval>) -> Instant {
	match interval {
		Some(interval) => interval.tick().await,
		None => std::future::pending().await,
	}
}

async fn next_frame(reader: &mut Option<FrameReader>) -> Option<Result<Frame, TransportError>> {
	match reader {
		Some(reader) => reader.next().await,
		None => std::future::pending().await,
	}
}
