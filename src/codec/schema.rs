//! Schema-aware decoding.
//!
//! Different endpoints report the same amount as a native number, a big integer or a numeric
//! string. A [`Schema`] names the fields that carry amounts and coerces every accepted
//! representation into [`Value::Integer`] before a typed record is deserialized.

use super::amount::{Amount, MAX_SAFE_INTEGER};
use super::error::{CodecError, excerpt};
use super::json::{parse, stringify};
use super::value::Value;
use serde::de::DeserializeOwned;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Key(String),
	/// `*`: every element of an array.
	Each,
}

/// Set of amount-bearing field paths, written as dotted paths with `*` over arrays.
#[derive(Debug, Clone, Default)]
pub struct Schema {
	amount_paths: Vec<Vec<Segment>>,
}

impl Schema {
	pub fn new() -> Self {
		Self::default()
	}

	/// Designate an amount field, e.g. `outputs.*.value`.
	pub fn amount(mut self, path: &str) -> Self {
		let segments = path
			.split('.')
			.filter(|s| !s.is_empty())
			.map(|s| match s {
				"*" => Segment::Each,
				key => Segment::Key(key.to_string()),
			})
			.collect();
		self.amount_paths.push(segments);
		self
	}

	/// Coerce every designated field into a canonical integer amount.
	///
	/// Missing fields are left alone; present fields that are not an integer, an integral
	/// float or a numeric string produce [`CodecError::Schema`].
	pub fn coerce(&self, mut value: Value) -> Result<Value, CodecError> {
		for path in &self.amount_paths {
			coerce_at(&mut value, path, String::new())?;
		}
		Ok(value)
	}

	/// Parse, coerce and deserialize JSON text into `T`.
	pub fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, CodecError> {
		let value = self.coerce(parse(text)?)?;
		from_value(&value)
	}

	/// Coerce and deserialize an already parsed value into `T`.
	pub fn decode_value<T: DeserializeOwned>(&self, value: Value) -> Result<T, CodecError> {
		let value = self.coerce(value)?;
		from_value(&value)
	}
}

/// Deserialize a typed record out of a codec value.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, CodecError> {
	serde_json::from_value(value.to_json()).map_err(|source| CodecError::Decode {
		raw: excerpt(&stringify(value)),
		source,
	})
}

fn coerce_at(value: &mut Value, path: &[Segment], rendered: String) -> Result<(), CodecError> {
	let Some((head, rest)) = path.split_first() else {
		return coerce_amount(value, &rendered);
	};

	match head {
		Segment::Key(key) => {
			let next = if rendered.is_empty() {
				key.clone()
			} else {
				format!("{}.{}", rendered, key)
			};
			match value.get_mut(key) {
				Some(child) => coerce_at(child, rest, next),
				None => Ok(()),
			}
		}
		Segment::Each => match value {
			Value::Array(items) => {
				for (idx, item) in items.iter_mut().enumerate() {
					coerce_at(item, rest, format!("{}[{}]", rendered, idx))?;
				}
				Ok(())
			}
			Value::Null => Ok(()),
			other => Err(CodecError::Schema {
				path: rendered,
				expected: "array",
				raw: excerpt(&stringify(other)),
			}),
		},
	}
}

fn coerce_amount(value: &mut Value, path: &str) -> Result<(), CodecError> {
	let coerced = match value {
		Value::Integer(_) => return Ok(()),
		Value::Float(f) if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64 => {
			Amount::Safe(*f as i64)
		}
		Value::String(s) => Amount::from_str(s.trim()).map_err(|_| CodecError::Schema {
			path: path.to_string(),
			expected: "integer amount",
			raw: s.clone(),
		})?,
		other => {
			return Err(CodecError::Schema {
				path: path.to_string(),
				expected: "integer amount",
				raw: excerpt(&stringify(other)),
			});
		}
	};
	*value = Value::Integer(coerced);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;

	#[derive(Debug, Deserialize)]
	struct Output {
		value: Amount,
		token: String,
	}

	#[derive(Debug, Deserialize)]
	struct Record {
		outputs: Vec<Output>,
		fee: Amount,
	}

	fn schema() -> Schema {
		Schema::new().amount("outputs.*.value").amount("fee")
	}

	#[test]
	fn coerces_every_representation() {
		let text = r#"{
			"fee": "12345678901234567890",
			"outputs": [
				{"value": 12345678901234567890, "token": "00"},
				{"value": 100, "token": "00"},
				{"value": "250", "token": "01"},
				{"value": 3e2, "token": "01"}
			]
		}"#;
		let record: Record = schema().decode(text).unwrap();

		assert_eq!(record.fee.to_string(), "12345678901234567890");
		assert!(!record.fee.is_safe());
		assert_eq!(record.outputs[0].value, record.fee);
		assert_eq!(record.outputs[1].value, Amount::Safe(100));
		assert_eq!(record.outputs[2].value, Amount::Safe(250));
		assert_eq!(record.outputs[3].value, Amount::Safe(300));
		assert_eq!(record.outputs[3].token, "01");
	}

	#[test]
	fn reports_offending_path_and_raw_input() {
		let text = r#"{"fee": 1, "outputs": [{"value": 1, "token": "00"}, {"value": "abc", "token": "00"}]}"#;
		let err = schema().decode::<Record>(text).unwrap_err();
		match err {
			CodecError::Schema { path, raw, .. } => {
				assert_eq!(path, "outputs[1].value");
				assert_eq!(raw, "abc");
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[test]
	fn non_integral_amount_is_rejected() {
		let text = r#"{"fee": 1.5, "outputs": []}"#;
		let err = schema().decode::<Record>(text).unwrap_err();
		assert!(matches!(err, CodecError::Schema { ref path, .. } if path == "fee"));
	}

	#[test]
	fn missing_fields_surface_as_decode_errors() {
		let err = schema().decode::<Record>(r#"{"outputs": []}"#).unwrap_err();
		assert!(matches!(err, CodecError::Decode { .. }));
	}
}
