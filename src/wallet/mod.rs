pub mod sync;
pub mod types;

pub use sync::{SyncAbortHandle, WalletSyncOrchestrator};
pub use types::*;
