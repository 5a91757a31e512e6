//! Wallet History Sync Module
//!
//! This module provides the services that pull a wallet's transaction history from a full node.
//! It is composed of several submodules, each responsible for a specific aspect of the sync process:
//!
//! - `orchestrator`: The main entry point. It waits for history-mode negotiation, picks a strategy and drives the wallet state.
//! - `events`: Defines the event types and event handling traits used for decoupled communication between sync components.
//! - `history_store`: In-memory store of addresses and transactions, with exact token balances.
//! - `polling`: Paged HTTP history retrieval for servers without history streaming.
//! - `progress_tracker`: Counts delivered addresses and transactions and logs progress.
//! - `strategies`: The streaming and polling sync strategies and their configuration.

/// Event system for decoupled communication during sync
pub mod events;
/// In-memory ingestion sink
pub mod history_store;
/// Main coordinator for the wallet sync process
pub mod orchestrator;
/// Paged HTTP history source
pub mod polling;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Streaming and polling synchronization strategies
pub mod strategies;

pub use events::{EventDispatcher, SyncEvent, SyncEventHandler};
pub use history_store::MemoryHistoryStore;
pub use orchestrator::*;
pub use polling::{HistoryPage, HistoryPoller, HttpHistoryPoller, PageCursor};
pub use progress_tracker::{SyncProgressTracker, SyncStats};
pub use strategies::{PollingHistorySync, StreamScan, StreamingHistorySync, SyncConfig, SyncStrategy};
