//! History streaming protocol.
//!
//! A history stream bulk-transfers a wallet's addresses and transactions over the shared
//! websocket. The server frames it as begin, then any number of address and vertex frames,
//! then end or error, all tagged with the id the client chose when it sent the request.

/// Session state machine and frame dispatch
mod coordinator;
/// Stream requests, items and errors
mod types;

pub use coordinator::{FrameOutcome, StreamSyncCoordinator};
pub use types::*;
