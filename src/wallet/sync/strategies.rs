use crate::connection::Connection;
use crate::stream::{AddressRecord, StreamItem, StreamRequest};
use crate::wallet::WalletSyncError;
use crate::wallet::sync::events::{EventDispatcher, SyncEvent};
use crate::wallet::sync::polling::HistoryPoller;
use crate::wallet::sync::progress_tracker::SyncProgressTracker;
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

/// Addresses per polling request.
const ADDRESSES_PER_REQUEST: usize = 20;

/// Trait for different synchronization strategies
#[async_trait::async_trait]
pub trait SyncStrategy: Send + Sync {
	/// Execute the sync strategy
	async fn sync(
		&mut self,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut SyncProgressTracker,
	) -> Result<(), WalletSyncError>;

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

/// Configuration for sync strategies
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Timeout for idle periods (no new stream items). Also bounds an aborted stream.
	pub idle_timeout: Duration,
	/// Gap limit sent with stream requests
	pub gap_limit: u32,
	/// How long to wait for the connection to negotiate a history mode
	pub mode_wait: Duration,
	/// Pause between polled history pages
	pub poll_page_delay: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			idle_timeout: Duration::from_secs(30),
			gap_limit: 20,
			mode_wait: Duration::from_secs(10),
			poll_page_delay: Duration::from_millis(100),
		}
	}
}

/// How a streaming sync discovers addresses.
#[derive(Debug, Clone)]
pub enum StreamScan {
	/// The server derives addresses from the xpub starting at `first_index`.
	Xpub { first_index: u32 },
	/// The client pages through known addresses.
	Manual {
		addresses: Vec<AddressRecord>,
		batch_size: usize,
	},
}

/// Strategy that pulls history through the streaming protocol
pub struct StreamingHistorySync {
	connection: Arc<Connection>,
	xpub: String,
	scan: StreamScan,
	config: SyncConfig,
}

impl StreamingHistorySync {
	pub fn new(
		connection: Arc<Connection>,
		xpub: String,
		scan: StreamScan,
		config: SyncConfig,
	) -> Self {
		Self {
			connection,
			xpub,
			scan,
			config,
		}
	}

	fn request(&self) -> (StreamRequest, Vec<Vec<AddressRecord>>) {
		match &self.scan {
			StreamScan::Xpub { first_index } => (
				StreamRequest::Xpub {
					xpub: self.xpub.clone(),
					first_index: *first_index,
					gap_limit: self.config.gap_limit,
				},
				Vec::new(),
			),
			StreamScan::Manual {
				addresses,
				batch_size,
			} => {
				let mut pages: Vec<Vec<AddressRecord>> = addresses
					.chunks((*batch_size).max(1))
					.map(<[AddressRecord]>::to_vec)
					.collect();
				// Stored reversed so `pop` yields the next page.
				pages.reverse();
				let first = pages.pop().unwrap_or_default();
				(
					StreamRequest::Manual {
						xpub: self.xpub.clone(),
						addresses: first,
						gap_limit: self.config.gap_limit,
					},
					pages,
				)
			}
		}
	}
}

#[async_trait::async_trait]
impl SyncStrategy for StreamingHistorySync {
	async fn sync(
		&mut self,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut SyncProgressTracker,
	) -> Result<(), WalletSyncError> {
		let (request, mut pending_pages) = self.request();
		let mut requested = match &request {
			StreamRequest::Manual { addresses, .. } => addresses.len(),
			StreamRequest::Xpub { .. } => 0,
		};
		let mut received = 0usize;

		let mut handle = self.connection.start_stream(request)?;
		info!("Started history stream {}", handle.id());

		loop {
			let item = match timeout(self.config.idle_timeout, handle.next()).await {
				Ok(item) => item,
				Err(_) => {
					warn!(
						"No stream activity for {} seconds, giving up",
						self.config.idle_timeout.as_secs()
					);
					self.connection.stop_stream();
					let err = WalletSyncError::IdleTimeout(self.config.idle_timeout);
					event_dispatcher
						.dispatch(&SyncEvent::SyncError {
							error: err.to_string(),
						})
						.await?;
					return Err(err);
				}
			};

			match item {
				StreamItem::Address(record) => {
					progress_tracker.record_address(record.index);
					event_dispatcher
						.dispatch(&SyncEvent::AddressDiscovered(record))
						.await?;

					// Manual scans: ask for the next page once the server has reported every
					// address sent so far.
					received += 1;
					if received >= requested {
						if let Some(page) = pending_pages.pop() {
							debug!("Requesting next manual page of {} addresses", page.len());
							requested += page.len();
							self.connection.request_manual_batch(page)?;
						}
					}
				}
				StreamItem::Vertex(vertex) => {
					progress_tracker.record_vertex(&vertex.tx_id);
					event_dispatcher
						.dispatch(&SyncEvent::VertexReceived(*vertex))
						.await?;
					progress_tracker.log_progress(false);
				}
				StreamItem::Finished(Ok(summary)) => {
					progress_tracker.validate_completion();
					info!(
						"History stream {} finished: {}",
						summary.id,
						progress_tracker.get_stats().summary()
					);
					event_dispatcher
						.dispatch(&SyncEvent::SyncCompleted {
							addresses: summary.addresses,
							vertices: summary.vertices,
						})
						.await?;
					return Ok(());
				}
				StreamItem::Finished(Err(e)) => {
					error!("History stream failed: {}", e);
					event_dispatcher
						.dispatch(&SyncEvent::SyncError {
							error: e.to_string(),
						})
						.await?;
					return Err(e.into());
				}
			}
		}
	}

	fn name(&self) -> &'static str {
		"StreamingHistorySync"
	}
}

/// Strategy that pages through address history over HTTP
pub struct PollingHistorySync {
	poller: Arc<dyn HistoryPoller>,
	addresses: Vec<AddressRecord>,
	config: SyncConfig,
}

impl PollingHistorySync {
	pub fn new(
		poller: Arc<dyn HistoryPoller>,
		addresses: Vec<AddressRecord>,
		config: SyncConfig,
	) -> Self {
		Self {
			poller,
			addresses,
			config,
		}
	}
}

#[async_trait::async_trait]
impl SyncStrategy for PollingHistorySync {
	async fn sync(
		&mut self,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut SyncProgressTracker,
	) -> Result<(), WalletSyncError> {
		info!(
			"Starting polling history sync for {} addresses",
			self.addresses.len()
		);

		for record in &self.addresses {
			progress_tracker.record_address(record.index);
			event_dispatcher
				.dispatch(&SyncEvent::AddressDiscovered(record.clone()))
				.await?;
		}

		for chunk in self.addresses.chunks(ADDRESSES_PER_REQUEST) {
			let addresses: Vec<String> = chunk.iter().map(|r| r.address.clone()).collect();
			let mut cursor = None;

			loop {
				let page = match self.poller.fetch_page(&addresses, cursor.as_ref()).await {
					Ok(page) => page,
					Err(e) => {
						error!("Failed to fetch address history: {}", e);
						event_dispatcher
							.dispatch(&SyncEvent::SyncError {
								error: e.to_string(),
							})
							.await?;
						return Err(e);
					}
				};

				for vertex in page.history {
					progress_tracker.record_vertex(&vertex.tx_id);
					event_dispatcher
						.dispatch(&SyncEvent::VertexReceived(vertex))
						.await?;
				}
				progress_tracker.log_progress(false);

				match page.next {
					Some(next) => {
						cursor = Some(next);
						tokio::time::sleep(self.config.poll_page_delay).await;
					}
					None => break,
				}
			}
		}

		progress_tracker.validate_completion();
		let stats = progress_tracker.get_stats();
		info!("Polling sync completed: {}", stats.summary());
		event_dispatcher
			.dispatch(&SyncEvent::SyncCompleted {
				addresses: stats.addresses_discovered,
				vertices: stats.unique_vertices,
			})
			.await?;
		Ok(())
	}

	fn name(&self) -> &'static str {
		"PollingHistorySync"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::Value;
	use crate::connection::mock::{MockConnector, settle};
	use crate::connection::{ConnectionConfig, HistoryMode};
	use crate::stream::Vertex;
	use crate::wallet::sync::polling::{HistoryPage, PageCursor};
	use parking_lot::Mutex;

	const CAPABILITIES: &str = r#"{"type":"capabilities","capabilities":["history-streaming"]}"#;

	/// Serves one page per address chunk, plus a second page for the first chunk.
	#[derive(Default)]
	struct ChunkPoller {
		calls: Mutex<Vec<(Vec<String>, Option<PageCursor>)>>,
	}

	#[async_trait::async_trait]
	impl HistoryPoller for ChunkPoller {
		async fn fetch_page(
			&self,
			addresses: &[String],
			cursor: Option<&PageCursor>,
		) -> Result<HistoryPage, WalletSyncError> {
			self.calls
				.lock()
				.push((addresses.to_vec(), cursor.cloned()));
			let first = addresses[0].clone();
			let vertex: Vertex = Vertex::schema()
				.decode(&format!(
					r#"{{"tx_id":"{first}-{}","outputs":[{{"value":1,"token":"00","decoded":{{"address":"{first}"}}}}]}}"#,
					cursor.is_some()
				))
				.unwrap();
			let next = (first == "A0" && cursor.is_none()).then(|| PageCursor {
				hash: "h".into(),
				first_address: "A0".into(),
			});
			Ok(HistoryPage {
				history: vec![vertex],
				next,
			})
		}
	}

	#[tokio::test(start_paused = true)]
	async fn polling_pages_through_every_chunk() {
		let addresses: Vec<AddressRecord> = (0..25u32)
			.map(|i| AddressRecord::new(format!("A{i}"), i))
			.collect();
		let poller = Arc::new(ChunkPoller::default());
		let mut strategy = PollingHistorySync::new(poller.clone(), addresses, SyncConfig::default());
		let mut dispatcher = EventDispatcher::new();
		let mut tracker = SyncProgressTracker::new();

		strategy.sync(&mut dispatcher, &mut tracker).await.unwrap();

		let calls = poller.calls.lock();
		assert_eq!(calls.len(), 3);
		assert_eq!(calls[0].0.len(), ADDRESSES_PER_REQUEST);
		assert_eq!(calls[0].1, None);
		assert_eq!(calls[1].1.as_ref().map(|c| c.hash.as_str()), Some("h"));
		assert_eq!(calls[2].0, vec!["A20", "A21", "A22", "A23", "A24"]);

		let stats = tracker.get_stats();
		assert_eq!(stats.addresses_discovered, 25);
		assert_eq!(stats.highest_address_index, Some(24));
		assert_eq!(stats.unique_vertices, 3);
	}

	#[tokio::test(start_paused = true)]
	async fn manual_scan_requests_the_next_page_after_each_batch() {
		let (connector, mut servers) = MockConnector::new();
		let conn = Arc::new(
			Connection::new(ConnectionConfig::new("ws://node.local/v1a/ws/"))
				.with_connector(Arc::new(connector)),
		);
		conn.start().unwrap();
		settle().await;
		let mut server = match servers.try_next() {
			Ok(Some(server)) => server,
			_ => panic!("expected a server connection"),
		};
		server.send(CAPABILITIES);
		settle().await;
		assert_eq!(conn.history_mode(), Some(HistoryMode::Streaming));

		let scan = StreamScan::Manual {
			addresses: vec![
				AddressRecord::new("W0", 0),
				AddressRecord::new("W1", 1),
				AddressRecord::new("W2", 2),
			],
			batch_size: 2,
		};
		let mut strategy =
			StreamingHistorySync::new(conn.clone(), "xpub6CUGRUon".into(), scan, SyncConfig::default());

		let server_task = tokio::spawn(async move {
			let first = server.recv_non_ping().await.unwrap();
			assert_eq!(first.get("first").and_then(Value::as_bool), Some(true));
			let id = first.get("id").and_then(Value::as_str).unwrap().to_string();
			server.send(&format!(r#"{{"id":"{id}","type":"stream:history:begin"}}"#));
			for (address, index) in [("W0", 0), ("W1", 1)] {
				server.send(&format!(
					r#"{{"id":"{id}","type":"stream:history:address","address":"{address}","index":{index}}}"#
				));
			}

			let second = server.recv_non_ping().await.unwrap();
			assert_eq!(second.get("first").and_then(Value::as_bool), Some(false));
			assert_eq!(second.get("id").and_then(Value::as_str), Some(id.as_str()));
			server.send(&format!(
				r#"{{"id":"{id}","type":"stream:history:address","address":"W2","index":2}}"#
			));
			server.send(&format!(r#"{{"id":"{id}","type":"stream:history:end"}}"#));
			server
		});

		let mut dispatcher = EventDispatcher::new();
		let mut tracker = SyncProgressTracker::new();
		strategy.sync(&mut dispatcher, &mut tracker).await.unwrap();
		assert_eq!(tracker.get_stats().addresses_discovered, 3);

		let _server = server_task.await.unwrap();
		conn.stop().await;
	}

	#[tokio::test(start_paused = true)]
	async fn streaming_requires_negotiated_mode() {
		let (connector, _servers) = MockConnector::new();
		let conn = Arc::new(
			Connection::new(ConnectionConfig::new("ws://node.local/v1a/ws/"))
				.with_connector(Arc::new(connector)),
		);
		conn.start().unwrap();
		settle().await;

		let mut strategy = StreamingHistorySync::new(
			conn.clone(),
			"xpub6CUGRUon".into(),
			StreamScan::Xpub { first_index: 0 },
			SyncConfig::default(),
		);
		let mut dispatcher = EventDispatcher::new();
		let mut tracker = SyncProgressTracker::new();
		assert!(matches!(
			strategy.sync(&mut dispatcher, &mut tracker).await,
			Err(WalletSyncError::StreamError(
				crate::stream::StreamError::StreamingUnavailable
			))
		));
		conn.stop().await;
	}
}
