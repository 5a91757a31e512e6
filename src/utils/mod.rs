//!
//! Utility module for the wallet sync core.
//!
//! Re-exports formatting helpers for use throughout the codebase.
/// Utility functions for formatting and display
pub mod index;

pub use index::format_token_amount;
