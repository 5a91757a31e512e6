//! Precision-preserving JSON codec.
//!
//! Every wire message that may carry a monetary value goes through this module. Integers beyond
//! the double-precision safe range are promoted to big integers on decode and written back as
//! bare digit sequences on encode, so `parse(stringify(x)) == x` for every integer.

/// Exact integer amounts
mod amount;
/// Codec error type
mod error;
/// Text parsing and serialization
mod json;
/// Schema-aware coercion of amount fields
mod schema;
/// Decoded JSON values
mod value;

pub use amount::{Amount, MAX_SAFE_INTEGER, ParseAmountError};
pub use error::CodecError;
pub use json::{encode, parse, stringify};
pub use schema::{Schema, from_value};
pub use value::{Map, Value};
