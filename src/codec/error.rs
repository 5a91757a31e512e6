/// Errors raised while decoding or encoding wire JSON.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
	#[error("malformed JSON: {source} (input: {raw})")]
	Malformed {
		raw: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("exponential notation is not supported: {literal}")]
	ExponentialNotation { literal: String },

	#[error("large float will lose precision! ({literal})")]
	PrecisionLoss { literal: String },

	#[error("schema violation at {path}: expected {expected}, found {raw}")]
	Schema {
		path: String,
		expected: &'static str,
		raw: String,
	},

	#[error("failed to decode record: {source} (input: {raw})")]
	Decode {
		raw: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to encode message: {0}")]
	Encode(#[from] serde_json::Error),
}

/// Keep raw input in errors readable without dumping whole payloads into logs.
pub(crate) fn excerpt(raw: &str) -> String {
	const LIMIT: usize = 256;
	if raw.len() <= LIMIT {
		return raw.to_string();
	}
	let mut end = LIMIT;
	while !raw.is_char_boundary(end) {
		end -= 1;
	}
	format!("{}...", &raw[..end])
}
