use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use wallet_sync_core::connection::{Connection, ConnectionConfig};
use wallet_sync_core::stream::AddressRecord;
use wallet_sync_core::wallet::sync::{HttpHistoryPoller, SyncConfig};
use wallet_sync_core::wallet::{WalletAccount, WalletSyncOrchestrator};

/// How long to keep applying live updates after the initial sync.
const LIVE_UPDATE_WINDOW: Duration = Duration::from_secs(60);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting wallet sync service");

	let node_url = std::env::var("WALLET_NODE_URL")
		.unwrap_or_else(|_| "https://node1.testnet.example/v1a/".to_string());
	let xpub = std::env::var("WALLET_XPUB").map_err(|_| "WALLET_XPUB is not set")?;
	// Comma-separated addresses, in derivation order.
	let addresses: Vec<AddressRecord> = std::env::var("WALLET_ADDRESSES")
		.unwrap_or_default()
		.split(',')
		.map(str::trim)
		.filter(|a| !a.is_empty())
		.zip(0u32..)
		.map(|(address, index)| AddressRecord::new(address, index))
		.collect();

	let config = ConnectionConfig::from_env();
	let connection = Arc::new(Connection::websocket(config));
	connection.start()?;
	info!("Connection started");

	let poller = Arc::new(HttpHistoryPoller::new(node_url)?);
	let mut orchestrator = WalletSyncOrchestrator::new(
		connection.clone(),
		WalletAccount { xpub, addresses },
		poller,
		SyncConfig::default(),
	);

	match orchestrator.sync().await {
		Ok(stats) => {
			info!("Initial sync done: {}", stats.summary());
			let live = orchestrator.watch_live_updates();
			tokio::time::sleep(LIVE_UPDATE_WINDOW).await;
			live.abort();
		}
		Err(e) => error!("Wallet sync failed: {}", e),
	}

	info!("Wallet state: {}", orchestrator.state());
	connection.stop().await;
	Ok(())
}
