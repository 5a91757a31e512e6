//! Precision-safe JSON parsing and serialization.
//!
//! `serde_json` is built with `arbitrary_precision`, so every numeric literal reaches us as its
//! exact source text. Each literal is then classified:
//!
//! - plain integers become [`Amount`]s (native when safe, big-integer otherwise);
//! - decimals whose fractional digits are all zero are integers too;
//! - decimals with significant fractional digits are floats, unless the integer part is already
//!   beyond the safe range, which is rejected;
//! - exponential literals are floats, unless they denote an integer beyond the safe range,
//!   which is rejected.

use super::amount::{Amount, MAX_SAFE_INTEGER};
use super::error::{CodecError, excerpt};
use super::value::Value;
use num_bigint::BigInt;
use num_traits::Signed;
use serde::Serialize;
use std::str::FromStr;

/// Parse JSON text into a [`Value`], promoting unsafe integers to big integers.
pub fn parse(text: &str) -> Result<Value, CodecError> {
	let raw: serde_json::Value =
		serde_json::from_str(text).map_err(|source| CodecError::Malformed {
			raw: excerpt(text),
			source,
		})?;
	lift(raw)
}

/// Serialize a [`Value`]. Big integers are written as bare digits, never as strings.
pub fn stringify(value: &Value) -> String {
	value.to_json().to_string()
}

/// Serialize any typed message with the same big-integer rule.
pub fn encode<T: Serialize>(message: &T) -> Result<String, CodecError> {
	Ok(serde_json::to_string(message)?)
}

fn lift(raw: serde_json::Value) -> Result<Value, CodecError> {
	Ok(match raw {
		serde_json::Value::Null => Value::Null,
		serde_json::Value::Bool(b) => Value::Bool(b),
		serde_json::Value::Number(n) => classify_literal(&n.to_string())?,
		serde_json::Value::String(s) => Value::String(s),
		serde_json::Value::Array(items) => {
			Value::Array(items.into_iter().map(lift).collect::<Result<_, _>>()?)
		}
		serde_json::Value::Object(map) => Value::Object(
			map.into_iter()
				.map(|(k, v)| lift(v).map(|v| (k, v)))
				.collect::<Result<_, _>>()?,
		),
	})
}

/// Classify one numeric literal by its exact source text.
pub(crate) fn classify_literal(literal: &str) -> Result<Value, CodecError> {
	if literal.contains(['e', 'E']) {
		let float = f64::from_str(literal).map_err(|_| CodecError::ExponentialNotation {
			literal: literal.to_string(),
		})?;
		let needs_big = !float.is_finite()
			|| (float.fract() == 0.0 && float.abs() > MAX_SAFE_INTEGER as f64);
		if needs_big {
			return Err(CodecError::ExponentialNotation {
				literal: literal.to_string(),
			});
		}
		return Ok(Value::Float(float));
	}

	if let Some((int_part, fraction)) = literal.split_once('.') {
		if fraction.bytes().all(|b| b == b'0') {
			return integer_literal(int_part, literal);
		}
		let truncated = BigInt::from_str(int_part).map_err(|_| CodecError::PrecisionLoss {
			literal: literal.to_string(),
		})?;
		if truncated.abs() > BigInt::from(MAX_SAFE_INTEGER) {
			return Err(CodecError::PrecisionLoss {
				literal: literal.to_string(),
			});
		}
		let float = f64::from_str(literal).map_err(|_| CodecError::PrecisionLoss {
			literal: literal.to_string(),
		})?;
		return Ok(Value::Float(float));
	}

	integer_literal(literal, literal)
}

fn integer_literal(digits: &str, literal: &str) -> Result<Value, CodecError> {
	Amount::from_str(digits)
		.map(Value::Integer)
		.map_err(|_| CodecError::PrecisionLoss {
			literal: literal.to_string(),
		})
}
