//! JSON values produced by the precision-preserving codec.

use super::amount::Amount;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Object map used by [`Value::Object`].
pub type Map = BTreeMap<String, Value>;

/// A decoded JSON value whose integers never lose precision.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Null,
	Bool(bool),
	/// Integer literal, native when safe and big-integer otherwise.
	Integer(Amount),
	/// Literal with non-zero fractional digits or exponential notation.
	Float(f64),
	String(String),
	Array(Vec<Value>),
	Object(Map),
}

impl Value {
	/// Look up a key on an object; `None` for other kinds.
	pub fn get(&self, key: &str) -> Option<&Value> {
		match self {
			Value::Object(map) => map.get(key),
			_ => None,
		}
	}

	pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
		match self {
			Value::Object(map) => map.get_mut(key),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_amount(&self) -> Option<&Amount> {
		match self {
			Value::Integer(a) => Some(a),
			_ => None,
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		self.as_amount().and_then(Amount::as_i64)
	}

	pub fn as_u64(&self) -> Option<u64> {
		self.as_i64().and_then(|v| u64::try_from(v).ok())
	}

	/// Numeric view as a float. Big integers are rounded.
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Value::Float(f) => Some(*f),
			Value::Integer(Amount::Safe(v)) => Some(*v as f64),
			Value::Integer(Amount::Big(v)) => f64::from_str(&v.to_string()).ok(),
			_ => None,
		}
	}

	pub fn as_array(&self) -> Option<&Vec<Value>> {
		match self {
			Value::Array(items) => Some(items),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&Map> {
		match self {
			Value::Object(map) => Some(map),
			_ => None,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// The `type` discriminator every wire message carries.
	pub fn message_type(&self) -> Option<&str> {
		self.get("type").and_then(Value::as_str)
	}

	/// Human-readable kind name, used in schema errors.
	pub fn kind(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "boolean",
			Value::Integer(_) => "integer",
			Value::Float(_) => "float",
			Value::String(_) => "string",
			Value::Array(_) => "array",
			Value::Object(_) => "object",
		}
	}

	/// Convert into a `serde_json::Value`, keeping big integers as exact number tokens.
	pub fn to_json(&self) -> serde_json::Value {
		match self {
			Value::Null => serde_json::Value::Null,
			Value::Bool(b) => serde_json::Value::Bool(*b),
			Value::Integer(Amount::Safe(v)) => serde_json::Value::Number((*v).into()),
			Value::Integer(Amount::Big(v)) => serde_json::Number::from_str(&v.to_string())
				.map(serde_json::Value::Number)
				.unwrap_or(serde_json::Value::Null),
			Value::Float(f) => serde_json::Number::from_f64(*f)
				.map(serde_json::Value::Number)
				.unwrap_or(serde_json::Value::Null),
			Value::String(s) => serde_json::Value::String(s.clone()),
			Value::Array(items) => {
				serde_json::Value::Array(items.iter().map(Value::to_json).collect())
			}
			Value::Object(map) => serde_json::Value::Object(
				map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
			),
		}
	}

	/// Lift a standard JSON value without precision promotion. Integers outside `i64`
	/// are taken through `f64`, exactly as a plain JSON parser would.
	pub fn from_standard_json(value: serde_json::Value) -> Value {
		match value {
			serde_json::Value::Null => Value::Null,
			serde_json::Value::Bool(b) => Value::Bool(b),
			serde_json::Value::Number(n) => match n.as_i64() {
				Some(v) => Value::Integer(Amount::from(v)),
				None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
			},
			serde_json::Value::String(s) => Value::String(s),
			serde_json::Value::Array(items) => {
				Value::Array(items.into_iter().map(Value::from_standard_json).collect())
			}
			serde_json::Value::Object(map) => Value::Object(
				map.into_iter()
					.map(|(k, v)| (k, Value::from_standard_json(v)))
					.collect(),
			),
		}
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::String(s.to_string())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::String(s)
	}
}

impl From<bool> for Value {
	fn from(b: bool) -> Self {
		Value::Bool(b)
	}
}

impl From<Amount> for Value {
	fn from(a: Amount) -> Self {
		Value::Integer(a)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Integer(Amount::from(v))
	}
}

impl From<u32> for Value {
	fn from(v: u32) -> Self {
		Value::Integer(Amount::from(i64::from(v)))
	}
}

impl<T: Into<Value>> From<Vec<T>> for Value {
	fn from(items: Vec<T>) -> Self {
		Value::Array(items.into_iter().map(Into::into).collect())
	}
}

impl From<Map> for Value {
	fn from(map: Map) -> Self {
		Value::Object(map)
	}
}
