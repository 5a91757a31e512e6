//! Event system for wallet synchronization.
//!
//! Sync strategies turn whatever their transport delivers (stream items or polled pages) into
//! `SyncEvent`s and hand them to an `EventDispatcher`, which calls every registered handler in
//! registration order. Handlers are the ingestion sinks for addresses and transactions, so the
//! order in which events are dispatched is the order in which records reach storage.

use crate::stream::{AddressRecord, Vertex};
use crate::wallet::WalletSyncError;

/// Events that occur during wallet synchronization
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// An address that belongs to the wallet
    AddressDiscovered(AddressRecord),
    /// A transaction touching one of the wallet's addresses
    VertexReceived(Vertex),
    /// Sync has completed
    SyncCompleted { addresses: usize, vertices: usize },
    /// Sync failed; partial progress is not resumed
    SyncError { error: String },
}

/// Trait for handling sync events.
///
/// Implementors receive all sync events and can perform side effects or state updates.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), WalletSyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, event: &SyncEvent) -> Result<(), WalletSyncError> {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
                // Continue processing with other handlers
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    #[async_trait::async_trait]
    impl SyncEventHandler for Failing {
        async fn handle(&mut self, _event: &SyncEvent) -> Result<(), WalletSyncError> {
            Err(WalletSyncError::SyncError("sink unavailable".into()))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl SyncEventHandler for Counting {
        async fn handle(&mut self, _event: &SyncEvent) -> Result<(), WalletSyncError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Counting"
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(Failing));
        dispatcher.register_handler(Box::new(Counting(seen.clone())));

        let event = SyncEvent::AddressDiscovered(AddressRecord::new("WZ7p", 0));
        dispatcher.dispatch(&event).await.unwrap();
        dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.handler_count(), 2);
    }
}
