//! Real-time wallet connection core.
//!
//! - `codec`: precision-preserving JSON for token amounts.
//! - `connection`: the self-healing wallet websocket and its facade.
//! - `stream`: history streaming sessions.
//! - `wallet`: history sync on top of the connection.

pub mod codec;
pub mod connection;
pub mod stream;
pub mod utils;
pub mod wallet;
