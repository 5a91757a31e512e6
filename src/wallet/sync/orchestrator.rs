//! Wallet sync orchestrator.
//!
//! `WalletSyncOrchestrator` is the caller side of the history protocols. It waits for the
//! connection to negotiate a history mode, picks the matching strategy (streaming or polling),
//! drives the wallet state through `Loading`, `Syncing` and `Ready`, and subscribes every known
//! address for live updates once the initial history is in.
//!
//! Any failure, including a stream error frame, a lost connection or an idle stream, moves the
//! wallet to `Error`. Nothing is resumed: the caller restarts sync from scratch.

use crate::codec::Value;
use crate::connection::{Connection, ConnectionEvent, ConnectionState, HistoryMode, ServerMessage};
use crate::stream::NATIVE_TOKEN_UID;
use crate::utils::format_token_amount;
use crate::wallet::sync::{
    events::EventDispatcher,
    history_store::MemoryHistoryStore,
    polling::HistoryPoller,
    progress_tracker::{SyncProgressTracker, SyncStats},
    strategies::{PollingHistorySync, StreamScan, StreamingHistorySync, SyncConfig, SyncStrategy},
};
use crate::wallet::{WalletAccount, WalletState, WalletSyncError};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Decimal places of the native token.
pub const NATIVE_TOKEN_DECIMALS: u32 = 2;

/// Aborts a running streaming sync. The sync fails with `Aborted` once its idle timeout elapses.
#[derive(Clone)]
pub struct SyncAbortHandle {
    connection: Arc<Connection>,
    requested: Arc<AtomicBool>,
}

impl SyncAbortHandle {
    pub fn abort(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Some(id) = self.connection.stop_stream() {
            info!("Abort requested for history stream {}", id);
        }
    }
}

/// Main wallet sync orchestrator that coordinates all sync components.
pub struct WalletSyncOrchestrator {
    connection: Arc<Connection>,
    account: WalletAccount,
    poller: Arc<dyn HistoryPoller>,
    store: MemoryHistoryStore,
    config: SyncConfig,
    scan: StreamScan,
    state: watch::Sender<WalletState>,
    abort_requested: Arc<AtomicBool>,
}

impl WalletSyncOrchestrator {
    pub fn new(
        connection: Arc<Connection>,
        account: WalletAccount,
        poller: Arc<dyn HistoryPoller>,
        config: SyncConfig,
    ) -> Self {
        Self {
            connection,
            account,
            poller,
            store: MemoryHistoryStore::new(),
            config,
            scan: StreamScan::Xpub { first_index: 0 },
            state: watch::Sender::new(WalletState::Loading),
            abort_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a different address scan for streaming syncs.
    pub fn with_stream_scan(mut self, scan: StreamScan) -> Self {
        self.scan = scan;
        self
    }

    pub fn store(&self) -> &MemoryHistoryStore {
        &self.store
    }

    pub fn state(&self) -> WalletState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<WalletState> {
        self.state.subscribe()
    }

    /// Abort the running streaming sync, if any.
    pub fn abort(&self) {
        self.abort_handle().abort();
    }

    /// Handle that aborts a sync running on another task.
    pub fn abort_handle(&self) -> SyncAbortHandle {
        SyncAbortHandle {
            connection: self.connection.clone(),
            requested: self.abort_requested.clone(),
        }
    }

    fn set_state(&self, state: WalletState) {
        if self.state.send_replace(state) != state {
            info!("Wallet state: {}", state);
        }
    }

    /// Run a full history sync.
    pub async fn sync(&mut self) -> Result<SyncStats, WalletSyncError> {
        info!("Starting wallet synchronization");
        self.abort_requested.store(false, Ordering::SeqCst);
        self.store.clear();
        self.set_state(WalletState::Loading);

        match self.run_sync().await {
            Ok(stats) => {
                self.set_state(WalletState::Ready);
                info!("Wallet synchronization completed: {}", stats.summary());
                self.log_balances();
                Ok(stats)
            }
            Err(e) => {
                error!("Wallet synchronization failed: {}", e);
                // Partial history is not resumed.
                self.store.clear();
                self.set_state(WalletState::Error);
                if self.abort_requested.load(Ordering::SeqCst) {
                    Err(WalletSyncError::Aborted)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn run_sync(&mut self) -> Result<SyncStats, WalletSyncError> {
        let mode = self
            .connection
            .wait_history_mode(self.config.mode_wait)
            .await
            .ok_or(WalletSyncError::NegotiationTimeout(self.config.mode_wait))?;

        let mut strategy: Box<dyn SyncStrategy> = match mode {
            HistoryMode::Streaming => Box::new(StreamingHistorySync::new(
                self.connection.clone(),
                self.account.xpub.clone(),
                self.scan.clone(),
                self.config.clone(),
            )),
            HistoryMode::Polling => Box::new(PollingHistorySync::new(
                self.poller.clone(),
                self.account.addresses.clone(),
                self.config.clone(),
            )),
        };
        info!("Syncing history with {}", strategy.name());
        self.set_state(WalletState::Syncing);

        let mut event_dispatcher = EventDispatcher::new();
        event_dispatcher.register_handler(Box::new(self.store.clone()));
        let mut progress_tracker = SyncProgressTracker::new();

        strategy
            .sync(&mut event_dispatcher, &mut progress_tracker)
            .await?;

        for record in self.store.addresses() {
            self.connection.subscribe_address(&record.address)?;
        }

        Ok(progress_tracker.get_stats())
    }

    fn log_balances(&self) {
        let balances = self.store.balances();
        if balances.is_empty() {
            info!("Wallet has no transactions");
        }
        for (token, balance) in balances {
            if token == NATIVE_TOKEN_UID {
                info!(
                    "Balance: {} (native)",
                    format_token_amount(&balance, NATIVE_TOKEN_DECIMALS)
                );
            } else {
                info!("Balance of token {}: {}", token, balance);
            }
        }
    }

    /// Apply live `wallet:address_history` pushes to the store until the connection stops.
    pub fn watch_live_updates(&self) -> JoinHandle<()> {
        let mut events = self.connection.subscribe();
        let store = self.store.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::Message {
                        message: ServerMessage::AddressHistory(payload),
                        ..
                    }) => apply_live_update(&store, &payload),
                    Ok(ConnectionEvent::State(ConnectionState::Closed)) => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Live update listener lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn apply_live_update(store: &MemoryHistoryStore, payload: &Value) {
    match store.ingest_address_history(payload) {
        Ok(vertex) => info!("Live update for transaction {}", vertex.tx_id),
        Err(e) => error!("Invalid address history push: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Amount;
    use crate::connection::ConnectionConfig;
    use crate::connection::mock::{MockConnector, MockServer, advance, settle};
    use crate::stream::AddressRecord;
    use crate::wallet::sync::polling::{HistoryPage, PageCursor};
    use futures::channel::mpsc as fmpsc;
    use parking_lot::Mutex;
    use std::time::Duration;

    const CAPABILITIES: &str = r#"{"type":"capabilities","capabilities":["history-streaming"]}"#;

    /// Poller that serves canned pages and records its calls.
    #[derive(Default)]
    struct CannedPoller {
        pages: Mutex<Vec<HistoryPage>>,
        calls: Mutex<Vec<Option<PageCursor>>>,
    }

    #[async_trait::async_trait]
    impl HistoryPoller for CannedPoller {
        async fn fetch_page(
            &self,
            _addresses: &[String],
            cursor: Option<&PageCursor>,
        ) -> Result<HistoryPage, WalletSyncError> {
            self.calls.lock().push(cursor.cloned());
            let mut pages = self.pages.lock();
            if pages.is_empty() {
                return Ok(HistoryPage {
                    history: Vec::new(),
                    next: None,
                });
            }
            Ok(pages.remove(0))
        }
    }

    fn account() -> WalletAccount {
        WalletAccount {
            xpub: "xpub6CUGRUon".into(),
            addresses: vec![AddressRecord::new("W0", 0), AddressRecord::new("W1", 1)],
        }
    }

    fn started_connection() -> (Arc<Connection>, fmpsc::UnboundedReceiver<MockServer>) {
        let (connector, servers) = MockConnector::new();
        let conn = Connection::new(ConnectionConfig::new("ws://node.local/v1a/ws/"))
            .with_connector(Arc::new(connector));
        conn.start().unwrap();
        (Arc::new(conn), servers)
    }

    fn next_server(servers: &mut fmpsc::UnboundedReceiver<MockServer>) -> MockServer {
        match servers.try_next() {
            Ok(Some(server)) => server,
            _ => panic!("expected a server connection"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn streamed_history_sets_the_balance() {
        let (conn, mut servers) = started_connection();
        settle().await;
        let mut server = next_server(&mut servers);
        server.send(CAPABILITIES);
        settle().await;

        let mut orchestrator = WalletSyncOrchestrator::new(
            conn.clone(),
            account(),
            Arc::new(CannedPoller::default()),
            SyncConfig::default(),
        );
        let state = orchestrator.watch_state();

        let server_task = tokio::spawn(async move {
            let request = server.recv_non_ping().await.unwrap();
            let id = request
                .get("id")
                .and_then(Value::as_str)
                .unwrap()
                .to_string();
            server.send(&format!(r#"{{"id":"{id}","type":"stream:history:begin"}}"#));
            server.send(&format!(
                r#"{{"id":"{id}","type":"stream:history:address","address":"W0","index":0}}"#
            ));
            server.send(&format!(
                r#"{{"id":"{id}","type":"stream:history:vertex","data":{{"tx_id":"a1","outputs":[{{"value":12345678901234567890,"token":"00","decoded":{{"address":"W0"}}}},{{"value":7,"token":"00","decoded":{{"address":"Wx"}}}}]}}}}"#
            ));
            server.send(&format!(r#"{{"id":"{id}","type":"stream:history:end"}}"#));
            // The sync subscribes its addresses once done.
            let sub = server.recv_non_ping().await.unwrap();
            assert_eq!(sub.message_type(), Some("subscribe_address"));
            server
        });

        let stats = orchestrator.sync().await.unwrap();
        assert_eq!(stats.unique_vertices, 1);
        assert_eq!(*state.borrow(), WalletState::Ready);
        assert_eq!(
            orchestrator.store().balance("00"),
            "12345678901234567890".parse::<Amount>().unwrap()
        );

        let _server = server_task.await.unwrap();
        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_puts_the_wallet_in_error() {
        let (conn, mut servers) = started_connection();
        settle().await;
        let mut server = next_server(&mut servers);
        server.send(CAPABILITIES);
        settle().await;

        let mut orchestrator = WalletSyncOrchestrator::new(
            conn.clone(),
            account(),
            Arc::new(CannedPoller::default()),
            SyncConfig::default(),
        );

        let server_task = tokio::spawn(async move {
            let request = server.recv_non_ping().await.unwrap();
            let id = request
                .get("id")
                .and_then(Value::as_str)
                .unwrap()
                .to_string();
            server.send(&format!(r#"{{"id":"{id}","type":"stream:history:begin"}}"#));
            server.send(&format!(
                r#"{{"id":"{id}","type":"stream:history:error","errmsg":"Invalid xpub"}}"#
            ));
            server
        });

        let err = orchestrator.sync().await.unwrap_err();
        assert!(matches!(err, WalletSyncError::StreamError(_)));
        assert_eq!(orchestrator.state(), WalletState::Error);

        let _server = server_task.await.unwrap();
        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stream_discards_partial_history() {
        let (conn, mut servers) = started_connection();
        settle().await;
        let mut server = next_server(&mut servers);
        server.send(CAPABILITIES);
        settle().await;

        let mut orchestrator = WalletSyncOrchestrator::new(
            conn.clone(),
            account(),
            Arc::new(CannedPoller::default()),
            SyncConfig::default(),
        );
        orchestrator.store().add_address(&AddressRecord::new("Wstale", 7));

        let server_task = tokio::spawn(async move {
            let request = server.recv_non_ping().await.unwrap();
            let id = request
                .get("id")
                .and_then(Value::as_str)
                .unwrap()
                .to_string();
            server.send(&format!(r#"{{"id":"{id}","type":"stream:history:begin"}}"#));
            server.send(&format!(
                r#"{{"id":"{id}","type":"stream:history:address","address":"W0","index":0}}"#
            ));
            server.send(&format!(
                r#"{{"id":"{id}","type":"stream:history:vertex","data":{{"tx_id":"c1","outputs":[{{"value":500,"token":"00","decoded":{{"address":"W0"}}}}]}}}}"#
            ));
            server.send(&format!(
                r#"{{"id":"{id}","type":"stream:history:error","errmsg":"boom"}}"#
            ));
            server
        });

        let err = orchestrator.sync().await.unwrap_err();
        assert!(matches!(err, WalletSyncError::StreamError(_)));
        assert_eq!(orchestrator.state(), WalletState::Error);
        assert_eq!(orchestrator.store().vertex_count(), 0);
        assert!(orchestrator.store().addresses().is_empty());
        assert_eq!(orchestrator.store().balance("00"), Amount::zero());

        let _server = server_task.await.unwrap();
        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_uses_polling_and_never_streams() {
        let (conn, mut servers) = started_connection();
        settle().await;
        let mut server = next_server(&mut servers);

        let poller = Arc::new(CannedPoller::default());
        poller.pages.lock().push(HistoryPage {
            history: vec![
                crate::stream::Vertex::schema()
                    .decode(r#"{"tx_id":"p1","outputs":[{"value":50,"token":"00","decoded":{"address":"W1"}}]}"#)
                    .unwrap(),
            ],
            next: Some(PageCursor {
                hash: "p1".into(),
                first_address: "W1".into(),
            }),
        });

        let mut orchestrator = WalletSyncOrchestrator::new(
            conn.clone(),
            account(),
            poller.clone(),
            SyncConfig::default(),
        );
        let stats = orchestrator.sync().await.unwrap();

        assert_eq!(conn.history_mode(), Some(HistoryMode::Polling));
        assert_eq!(stats.unique_vertices, 1);
        assert_eq!(orchestrator.store().balance("00"), Amount::Safe(50));
        assert_eq!(poller.calls.lock().len(), 2);
        assert_eq!(orchestrator.state(), WalletState::Ready);

        settle().await;
        let sent = server.drain();
        assert!(sent.iter().all(|m| !m
            .message_type()
            .is_some_and(|t| t.starts_with("request:history"))));
        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn abort_ends_in_error_after_the_idle_timeout() {
        let (conn, mut servers) = started_connection();
        settle().await;
        let server = next_server(&mut servers);
        server.send(CAPABILITIES);
        settle().await;

        let config = SyncConfig {
            idle_timeout: Duration::from_secs(2),
            ..SyncConfig::default()
        };
        let mut orchestrator = WalletSyncOrchestrator::new(
            conn.clone(),
            account(),
            Arc::new(CannedPoller::default()),
            config,
        );
        let abort = orchestrator.abort_handle();
        let mut state = orchestrator.watch_state();

        let sync = tokio::spawn(async move { orchestrator.sync().await });
        settle().await;
        assert_eq!(*state.borrow_and_update(), WalletState::Syncing);
        assert!(conn.stream_status().is_some());

        abort.abort();
        assert!(conn.stream_status().is_none());
        advance(Duration::from_secs(2)).await;

        let result = sync.await.unwrap();
        assert!(matches!(result, Err(WalletSyncError::Aborted)));
        assert_eq!(*state.borrow(), WalletState::Error);
        conn.stop().await;
        drop(server);
    }

    #[tokio::test(start_paused = true)]
    async fn live_pushes_update_the_store() {
        let (conn, mut servers) = started_connection();
        settle().await;
        let server = next_server(&mut servers);

        let orchestrator = WalletSyncOrchestrator::new(
            conn.clone(),
            account(),
            Arc::new(CannedPoller::default()),
            SyncConfig::default(),
        );
        orchestrator.store().add_address(&AddressRecord::new("W0", 0));
        let listener = orchestrator.watch_live_updates();

        server.send(r#"{"type":"wallet:address_history","history":{"tx_id":"l1","outputs":[{"value":9,"token":"00","decoded":{"address":"W0"}}]}}"#);
        settle().await;
        assert_eq!(orchestrator.store().balance("00"), Amount::Safe(9));

        conn.stop().await;
        listener.await.unwrap();
    }
}
