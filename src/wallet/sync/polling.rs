//! Paged HTTP history retrieval.
//!
//! Used when the connection did not negotiate history streaming. The full node serves address
//! history in pages; a page that `has_more` names the transaction hash and address the next page
//! starts from.

use super::history_store::history_page_schema;
use crate::stream::Vertex;
use crate::wallet::WalletSyncError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Where the next page of a multi-page history starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
	pub hash: String,
	pub first_address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
	pub history: Vec<Vertex>,
	/// Present when more pages follow.
	pub next: Option<PageCursor>,
}

/// Source of paged address history.
#[async_trait::async_trait]
pub trait HistoryPoller: Send + Sync {
	async fn fetch_page(
		&self,
		addresses: &[String],
		cursor: Option<&PageCursor>,
	) -> Result<HistoryPage, WalletSyncError>;
}

#[derive(Debug, Deserialize)]
struct AddressHistoryResponse {
	success: bool,
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	history: Vec<Vertex>,
	#[serde(default)]
	has_more: bool,
	#[serde(default)]
	first_hash: Option<String>,
	#[serde(default)]
	first_address: Option<String>,
}

impl AddressHistoryResponse {
	fn into_page(self) -> Result<HistoryPage, WalletSyncError> {
		if !self.success {
			return Err(WalletSyncError::SyncError(format!(
				"address history request failed: {}",
				self.message.unwrap_or_else(|| "unknown error".to_string())
			)));
		}

		let next = if self.has_more {
			match (self.first_hash, self.first_address) {
				(Some(hash), Some(first_address)) => Some(PageCursor {
					hash,
					first_address,
				}),
				_ => {
					return Err(WalletSyncError::SyncError(
						"paged history response without a cursor".to_string(),
					));
				}
			}
		} else {
			None
		};

		Ok(HistoryPage {
			history: self.history,
			next,
		})
	}
}

/// `thin_wallet/address_history` over HTTP.
#[derive(Clone)]
pub struct HttpHistoryPoller {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the node API, e.g. `https://node.example/v1a/`.
	base_url: String,
}

impl HttpHistoryPoller {
	pub fn new(base_url: impl Into<String>) -> Result<Self, WalletSyncError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;
		let mut base_url = base_url.into();
		if !base_url.ends_with('/') {
			base_url.push('/');
		}
		Ok(Self {
			http_client,
			base_url,
		})
	}

	fn query(addresses: &[String], cursor: Option<&PageCursor>) -> Vec<(&'static str, String)> {
		let mut params: Vec<(&'static str, String)> = addresses
			.iter()
			.map(|a| ("addresses[]", a.clone()))
			.collect();
		if let Some(cursor) = cursor {
			params.push(("hash", cursor.hash.clone()));
			params.push(("first_address", cursor.first_address.clone()));
		}
		params
	}
}

#[async_trait::async_trait]
impl HistoryPoller for HttpHistoryPoller {
	async fn fetch_page(
		&self,
		addresses: &[String],
		cursor: Option<&PageCursor>,
	) -> Result<HistoryPage, WalletSyncError> {
		let url = format!("{}thin_wallet/address_history", self.base_url);
		debug!(
			"Fetching address history for {} addresses (cursor: {:?})",
			addresses.len(),
			cursor
		);

		let response = self
			.http_client
			.get(&url)
			.query(&Self::query(addresses, cursor))
			.send()
			.await?
			.error_for_status()?;
		let body = response.text().await?;

		let parsed: AddressHistoryResponse = history_page_schema().decode(&body)?;
		parsed.into_page()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::Amount;

	#[test]
	fn decodes_pages_with_big_amounts() {
		let body = r#"{
			"success": true,
			"history": [{"tx_id":"a1","outputs":[{"value":"12345678901234567890","token":"00","decoded":{"address":"W0"}}]}],
			"has_more": true,
			"first_hash": "a0",
			"first_address": "W3"
		}"#;
		let parsed: AddressHistoryResponse = history_page_schema().decode(body).unwrap();
		let page = parsed.into_page().unwrap();
		assert_eq!(
			page.history[0].outputs[0].value,
			"12345678901234567890".parse::<Amount>().unwrap()
		);
		assert_eq!(
			page.next,
			Some(PageCursor {
				hash: "a0".into(),
				first_address: "W3".into()
			})
		);
	}

	#[test]
	fn unsuccessful_responses_are_errors() {
		let parsed: AddressHistoryResponse = history_page_schema()
			.decode(r#"{"success":false,"message":"Too many addresses"}"#)
			.unwrap();
		assert!(matches!(
			parsed.into_page(),
			Err(WalletSyncError::SyncError(ref m)) if m.contains("Too many addresses")
		));
	}

	#[test]
	fn query_carries_cursor() {
		let cursor = PageCursor {
			hash: "a0".into(),
			first_address: "W3".into(),
		};
		let params = HttpHistoryPoller::query(&["W0".to_string(), "W1".to_string()], Some(&cursor));
		assert_eq!(
			params,
			vec![
				("addresses[]", "W0".to_string()),
				("addresses[]", "W1".to_string()),
				("hash", "a0".to_string()),
				("first_address", "W3".to_string()),
			]
		);
	}
}
