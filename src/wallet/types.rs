use crate::codec::CodecError;
use crate::connection::ConnectionError;
use crate::stream::{AddressRecord, StreamError};

use std::fmt;
use std::time::Duration;

/// Account the wallet syncs: its xpub and the addresses derived so far.
///
/// Address derivation itself happens outside this crate.
#[derive(Debug, Clone, Default)]
pub struct WalletAccount {
	pub xpub: String,
	pub addresses: Vec<AddressRecord>,
}

/// Wallet-level sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletState {
	Loading,
	Syncing,
	Ready,
	/// Terminal until the caller restarts sync from scratch.
	Error,
}

impl fmt::Display for WalletState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Loading => write!(f, "LOADING"),
			Self::Syncing => write!(f, "SYNCING"),
			Self::Ready => write!(f, "READY"),
			Self::Error => write!(f, "ERROR"),
		}
	}
}

/// Error types for wallet history sync
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum WalletSyncError {
	#[error("Connection error: {0}")]
	ConnectionError(#[from] ConnectionError),

	#[error("Stream error: {0}")]
	StreamError(#[from] StreamError),

	#[error("Codec error: {0}")]
	CodecError(#[from] CodecError),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("History mode not negotiated within {0:?}")]
	NegotiationTimeout(Duration),

	#[error("No stream activity for {0:?}")]
	IdleTimeout(Duration),

	#[error("Sync aborted")]
	Aborted,

	#[error("Sync error: {0}")]
	SyncError(String),
}
