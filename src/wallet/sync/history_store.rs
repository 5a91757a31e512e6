//! In-memory ingestion sink for wallet history.
//!
//! `MemoryHistoryStore` keeps the wallet's addresses and every transaction touching them, and
//! derives token balances from that history with exact amount arithmetic. It is cheap to clone:
//! clones share the same storage, so one clone can be registered as an event handler while
//! another is queried.

use crate::codec::{Amount, Schema, Value};
use crate::stream::{AddressRecord, Vertex};
use crate::wallet::WalletSyncError;
use crate::wallet::sync::events::{SyncEvent, SyncEventHandler};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct HistoryState {
	/// Address to derivation index.
	addresses: BTreeMap<String, u32>,
	vertices: HashMap<String, Vertex>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
	state: Arc<RwLock<HistoryState>>,
}

impl MemoryHistoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_address(&self, record: &AddressRecord) {
		self.state
			.write()
			.addresses
			.insert(record.address.clone(), record.index);
	}

	/// Insert or replace a transaction. A later version of the same transaction wins.
	pub fn add_vertex(&self, vertex: Vertex) {
		let mut state = self.state.write();
		if state.vertices.insert(vertex.tx_id.clone(), vertex).is_some() {
			debug!("Replaced stored transaction");
		}
	}

	/// Drop every address and transaction.
	pub fn clear(&self) {
		let mut state = self.state.write();
		state.addresses.clear();
		state.vertices.clear();
	}

	pub fn is_own_address(&self, address: &str) -> bool {
		self.state.read().addresses.contains_key(address)
	}

	/// Known addresses ordered by derivation index.
	pub fn addresses(&self) -> Vec<AddressRecord> {
		let state = self.state.read();
		let mut records: Vec<AddressRecord> = state
			.addresses
			.iter()
			.map(|(address, index)| AddressRecord::new(address.clone(), *index))
			.collect();
		records.sort_by_key(|r| r.index);
		records
	}

	pub fn vertex(&self, tx_id: &str) -> Option<Vertex> {
		self.state.read().vertices.get(tx_id).cloned()
	}

	pub fn vertex_count(&self) -> usize {
		self.state.read().vertices.len()
	}

	/// Balance of `token`: outputs received by wallet addresses minus inputs spent from them,
	/// over every non-voided transaction.
	pub fn balance(&self, token: &str) -> Amount {
		let state = self.state.read();
		let mut balance = Amount::zero();
		for vertex in state.vertices.values().filter(|v| !v.is_voided) {
			for output in vertex.outputs.iter().filter(|o| o.token == token) {
				if is_own(&state.addresses, output.decoded.address.as_deref()) {
					balance = &balance + &output.value;
				}
			}
			for input in vertex.inputs.iter().filter(|i| i.token == token) {
				if is_own(&state.addresses, input.decoded.address.as_deref()) {
					balance = &balance - &input.value;
				}
			}
		}
		balance
	}

	/// Balances of every token the wallet has seen.
	pub fn balances(&self) -> BTreeMap<String, Amount> {
		let tokens: Vec<String> = {
			let state = self.state.read();
			let mut tokens: Vec<String> = state
				.vertices
				.values()
				.flat_map(|v| {
					v.outputs
						.iter()
						.map(|o| o.token.clone())
						.chain(v.inputs.iter().map(|i| i.token.clone()))
				})
				.collect();
			tokens.sort();
			tokens.dedup();
			tokens
		};
		tokens
			.into_iter()
			.map(|token| {
				let balance = self.balance(&token);
				(token, balance)
			})
			.collect()
	}

	/// Apply a live `wallet:address_history` push.
	pub fn ingest_address_history(&self, payload: &Value) -> Result<Vertex, WalletSyncError> {
		let history = payload
			.get("history")
			.cloned()
			.ok_or_else(|| WalletSyncError::SyncError("address history without payload".into()))?;
		let vertex: Vertex = Vertex::schema().decode_value(history)?;
		self.add_vertex(vertex.clone());
		Ok(vertex)
	}
}

fn is_own(addresses: &BTreeMap<String, u32>, address: Option<&str>) -> bool {
	address.is_some_and(|a| addresses.contains_key(a))
}

#[async_trait::async_trait]
impl SyncEventHandler for MemoryHistoryStore {
	async fn handle(&mut self, event: &SyncEvent) -> Result<(), WalletSyncError> {
		match event {
			SyncEvent::AddressDiscovered(record) => self.add_address(record),
			SyncEvent::VertexReceived(vertex) => self.add_vertex(vertex.clone()),
			SyncEvent::SyncCompleted { .. } | SyncEvent::SyncError { .. } => {}
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"MemoryHistoryStore"
	}
}

/// Schema for paged history responses: every vertex under `history`.
pub(crate) fn history_page_schema() -> Schema {
	Schema::new()
		.amount("history.*.inputs.*.value")
		.amount("history.*.outputs.*.value")
}
