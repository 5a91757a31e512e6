//! Progress tracking for wallet synchronization.
//!
//! This module provides the `SyncProgressTracker`, which counts the addresses and transactions a
//! sync strategy has delivered, remembers the highest address index seen, notices transactions
//! delivered more than once and logs progress at regular intervals.
//!
//! The counts are diagnostic only; the history store is the authoritative state.

use std::collections::HashSet;
use tracing::{info, warn};

/// Log every this many vertices.
const LOG_EVERY_VERTICES: usize = 100;

/// Service for tracking synchronization progress
#[derive(Debug, Clone, Default)]
pub struct SyncProgressTracker {
    /// Highest derivation index reported for a wallet address
    highest_address_index: Option<u32>,
    /// Addresses reported by the sync source
    addresses_discovered: usize,
    /// Total vertices processed
    vertices_processed: usize,
    /// Ids of all vertices processed
    vertex_ids: HashSet<String>,
    /// Vertices delivered more than once
    duplicate_vertices: usize,
    /// Vertex count at which we last logged progress
    last_logged_vertices: usize,
}

impl SyncProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a wallet address at the given derivation index
    pub fn record_address(&mut self, index: u32) {
        self.addresses_discovered += 1;
        self.highest_address_index = Some(
            self.highest_address_index
                .map_or(index, |highest| highest.max(index)),
        );
    }

    /// Record a processed vertex
    pub fn record_vertex(&mut self, tx_id: &str) {
        self.vertices_processed += 1;
        if !self.vertex_ids.insert(tx_id.to_string()) {
            self.duplicate_vertices += 1;
        }
    }

    pub fn has_processed_data(&self) -> bool {
        self.addresses_discovered > 0 || self.vertices_processed > 0
    }

    /// Log progress at regular intervals or when forced
    pub fn log_progress(&mut self, force: bool) {
        let since_last_log = self
            .vertices_processed
            .saturating_sub(self.last_logged_vertices);
        let should_log = force || since_last_log >= LOG_EVERY_VERTICES;

        if should_log && self.has_processed_data() {
            info!(
                "Sync progress: {} addresses (highest index {}), {} transactions",
                self.addresses_discovered,
                self.highest_address_index
                    .map_or_else(|| "-".to_string(), |i| i.to_string()),
                self.vertices_processed
            );
            self.last_logged_vertices = self.vertices_processed;
        }
    }

    /// Get sync statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            highest_address_index: self.highest_address_index,
            addresses_discovered: self.addresses_discovered,
            vertices_processed: self.vertices_processed,
            unique_vertices: self.vertex_ids.len(),
            duplicate_vertices: self.duplicate_vertices,
        }
    }

    /// Warn about anything suspicious once the sync source reported completion
    pub fn validate_completion(&self) {
        if self.duplicate_vertices > 0 {
            warn!(
                "Sync delivered {} duplicate transactions",
                self.duplicate_vertices
            );
        }
    }
}

/// Statistics about the sync progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub highest_address_index: Option<u32>,
    pub addresses_discovered: usize,
    pub vertices_processed: usize,
    pub unique_vertices: usize,
    pub duplicate_vertices: usize,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "{} addresses, {} transactions{}",
            self.addresses_discovered,
            self.unique_vertices,
            if self.duplicate_vertices == 0 {
                String::new()
            } else {
                format!(" ({} duplicates)", self.duplicate_vertices)
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_highest_index_and_duplicates() {
        let mut tracker = SyncProgressTracker::new();
        assert!(!tracker.has_processed_data());

        tracker.record_address(3);
        tracker.record_address(1);
        tracker.record_vertex("00ab");
        tracker.record_vertex("00ab");
        tracker.record_vertex("00cd");

        let stats = tracker.get_stats();
        assert_eq!(stats.highest_address_index, Some(3));
        assert_eq!(stats.vertices_processed, 3);
        assert_eq!(stats.unique_vertices, 2);
        assert_eq!(stats.summary(), "2 addresses, 2 transactions (1 duplicates)");
    }
}
