//! Exact integer amounts.
//!
//! An `Amount` is logically an arbitrary-precision signed integer. Values whose magnitude fits
//! the double-precision safe-integer range are kept as a native `i64`; anything larger is held
//! as a `BigInt`. Every constructor normalizes, so two equal amounts always share a variant.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

/// Largest integer magnitude a double-precision float represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Token serde_json uses to carry arbitrary-precision numbers through `visit_map`.
const SERDE_JSON_NUMBER_TOKEN: &str = "$serde_json::private::Number";

/// A monetary amount decoded without precision loss.
#[derive(Debug, Clone)]
pub enum Amount {
	/// Magnitude within `MAX_SAFE_INTEGER`.
	Safe(i64),
	/// Magnitude beyond `MAX_SAFE_INTEGER`.
	Big(BigInt),
}

/// Error returned when a string is not a plain decimal integer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid integer literal: {0}")]
pub struct ParseAmountError(pub String);

impl Amount {
	pub fn zero() -> Self {
		Amount::Safe(0)
	}

	/// Build an amount from a big integer, demoting it to a native integer when safe.
	pub fn from_bigint(value: BigInt) -> Self {
		match value.to_i64() {
			Some(small) if small.unsigned_abs() <= MAX_SAFE_INTEGER as u64 => Amount::Safe(small),
			_ => Amount::Big(value),
		}
	}

	pub fn to_bigint(&self) -> BigInt {
		match self {
			Amount::Safe(v) => BigInt::from(*v),
			Amount::Big(v) => v.clone(),
		}
	}

	/// Whether the amount is held as a native integer.
	pub fn is_safe(&self) -> bool {
		matches!(self.normalized(), Amount::Safe(_))
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Amount::Safe(v) => Some(*v),
			Amount::Big(v) => v.to_i64(),
		}
	}

	pub fn is_zero(&self) -> bool {
		match self {
			Amount::Safe(v) => *v == 0,
			Amount::Big(v) => v.is_zero(),
		}
	}

	pub fn is_negative(&self) -> bool {
		match self {
			Amount::Safe(v) => *v < 0,
			Amount::Big(v) => v.is_negative(),
		}
	}

	fn normalized(&self) -> Amount {
		match self {
			Amount::Safe(v) if v.unsigned_abs() > MAX_SAFE_INTEGER as u64 => Amount::Big(BigInt::from(*v)),
			Amount::Big(v) => Amount::from_bigint(v.clone()),
			other => other.clone(),
		}
	}
}

impl Default for Amount {
	fn default() -> Self {
		Amount::zero()
	}
}

impl From<i64> for Amount {
	fn from(value: i64) -> Self {
		Amount::from_bigint(BigInt::from(value))
	}
}

impl From<u64> for Amount {
	fn from(value: u64) -> Self {
		Amount::from_bigint(BigInt::from(value))
	}
}

impl From<i128> for Amount {
	fn from(value: i128) -> Self {
		Amount::from_bigint(BigInt::from(value))
	}
}

impl From<u128> for Amount {
	fn from(value: u128) -> Self {
		Amount::from_bigint(BigInt::from(value))
	}
}

impl From<BigInt> for Amount {
	fn from(value: BigInt) -> Self {
		Amount::from_bigint(value)
	}
}

impl FromStr for Amount {
	type Err = ParseAmountError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let digits = s.strip_prefix('-').unwrap_or(s);
		if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
			return Err(ParseAmountError(s.to_string()));
		}
		BigInt::from_str(s)
			.map(Amount::from_bigint)
			.map_err(|_| ParseAmountError(s.to_string()))
	}
}

impl fmt::Display for Amount {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Amount::Safe(v) => write!(f, "{}", v),
			Amount::Big(v) => write!(f, "{}", v),
		}
	}
}

impl PartialEq for Amount {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Amount::Safe(a), Amount::Safe(b)) => a == b,
			_ => self.to_bigint() == other.to_bigint(),
		}
	}
}

impl Eq for Amount {}

impl PartialOrd for Amount {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Amount {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Amount::Safe(a), Amount::Safe(b)) => a.cmp(b),
			_ => self.to_bigint().cmp(&other.to_bigint()),
		}
	}
}

impl Add for Amount {
	type Output = Amount;

	fn add(self, rhs: Amount) -> Amount {
		&self + &rhs
	}
}

impl Add<&Amount> for &Amount {
	type Output = Amount;

	fn add(self, rhs: &Amount) -> Amount {
		if let (Amount::Safe(a), Amount::Safe(b)) = (self, rhs) {
			if let Some(sum) = a.checked_add(*b) {
				return Amount::from(sum);
			}
		}
		Amount::from_bigint(self.to_bigint() + rhs.to_bigint())
	}
}

impl Sub for Amount {
	type Output = Amount;

	fn sub(self, rhs: Amount) -> Amount {
		&self - &rhs
	}
}

impl Sub<&Amount> for &Amount {
	type Output = Amount;

	fn sub(self, rhs: &Amount) -> Amount {
		if let (Amount::Safe(a), Amount::Safe(b)) = (self, rhs) {
			if let Some(diff) = a.checked_sub(*b) {
				return Amount::from(diff);
			}
		}
		Amount::from_bigint(self.to_bigint() - rhs.to_bigint())
	}
}

impl Neg for Amount {
	type Output = Amount;

	fn neg(self) -> Amount {
		Amount::from_bigint(-self.to_bigint())
	}
}

impl std::iter::Sum for Amount {
	fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
		iter.fold(Amount::zero(), |acc, x| &acc + &x)
	}
}

impl Serialize for Amount {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self.normalized() {
			Amount::Safe(v) => serializer.serialize_i64(v),
			Amount::Big(v) => {
				// Bare digits: serde_json writes arbitrary-precision numbers verbatim.
				let number = serde_json::Number::from_str(&v.to_string())
					.map_err(serde::ser::Error::custom)?;
				number.serialize(serializer)
			}
		}
	}
}

impl<'de> Deserialize<'de> for Amount {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserializer.deserialize_any(AmountVisitor)
	}
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
	type Value = Amount;

	fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("an integer, a numeric string or an arbitrary-precision number")
	}

	fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
		Ok(Amount::from(v))
	}

	fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
		Ok(Amount::from(v))
	}

	fn visit_i128<E: de::Error>(self, v: i128) -> Result<Amount, E> {
		Ok(Amount::from(v))
	}

	fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
		Ok(Amount::from(v))
	}

	fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
		if v.fract() != 0.0 || v.abs() > MAX_SAFE_INTEGER as f64 {
			return Err(E::custom(format!("{} is not an exact integer amount", v)));
		}
		Ok(Amount::Safe(v as i64))
	}

	fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
		parse_numeric_text(v).map_err(E::custom)
	}

	fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Amount, A::Error> {
		let key: Option<String> = map.next_key()?;
		match key.as_deref() {
			Some(SERDE_JSON_NUMBER_TOKEN) => {
				let raw: String = map.next_value()?;
				parse_numeric_text(&raw).map_err(de::Error::custom)
			}
			_ => Err(de::Error::invalid_type(de::Unexpected::Map, &self)),
		}
	}
}

/// Accept plain integers and integral decimals such as `"100.00"`.
fn parse_numeric_text(raw: &str) -> Result<Amount, ParseAmountError> {
	let trimmed = raw.trim();
	match trimmed.split_once('.') {
		Some((int_part, frac)) if !frac.is_empty() && frac.bytes().all(|b| b == b'0') => {
			Amount::from_str(int_part)
		}
		Some(_) => Err(ParseAmountError(raw.to_string())),
		None => Amount::from_str(trimmed),
	}
}
