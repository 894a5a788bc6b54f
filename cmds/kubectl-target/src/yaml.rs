//! Manifest stream decoding and encoding.
//!
//! Streams are split on `---` separator lines before decoding, the way
//! kubectl's YAML reader does, so one broken document only costs that
//! document. Output is always a multi-document YAML stream.

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("invalid YAML: {0}")]
	Yaml(String),

	#[error("invalid JSON")]
	Json(#[source] serde_json::Error),
}

/// One decoded document of a stream, numbered from 1.
pub type Document = (usize, Result<JsonValue, DecodeError>);

fn parse_options() -> serde_saphyr::Options {
	// Match kubectl's YAML 1.1 reading, e.g. 0755 is an octal number
	serde_saphyr::Options {
		legacy_octal_numbers: true,
		budget: None,
		..Default::default()
	}
}

/// Whether a line separates two YAML documents.
///
/// Only comments may follow the marker; anything else is left for the
/// YAML parser to interpret.
fn is_separator(line: &str) -> bool {
	line.strip_prefix("---").is_some_and(|rest| {
		let rest = rest.trim();
		rest.is_empty() || rest.starts_with('#')
	})
}

/// Split a YAML stream into document chunks.
pub fn split_documents(stream: &str) -> Vec<&str> {
	let mut chunks = Vec::new();
	let mut start = 0;
	let mut offset = 0;
	for line in stream.split_inclusive('\n') {
		if is_separator(line.trim_end_matches(['\r', '\n'])) {
			chunks.push(&stream[start..offset]);
			start = offset + line.len();
		}
		offset += line.len();
	}
	chunks.push(&stream[start..]);
	chunks.retain(|c| !c.trim().is_empty());
	chunks
}

fn looks_like_json(stream: &str) -> bool {
	matches!(stream.trim_start().chars().next(), Some('{' | '['))
}

/// Decode a stream of YAML documents or concatenated JSON values.
///
/// Null documents (e.g. a chunk holding only comments) are dropped.
#[instrument(skip_all, fields(len = stream.len()))]
pub fn decode_documents(stream: &str) -> Vec<Document> {
	let decoded = if looks_like_json(stream) {
		decode_json(stream)
	} else {
		decode_yaml(stream)
	};

	decoded
		.into_iter()
		.filter(|doc| !matches!(doc, Ok(JsonValue::Null)))
		.enumerate()
		.map(|(i, doc)| (i + 1, doc))
		.collect()
}

fn decode_yaml(stream: &str) -> Vec<Result<JsonValue, DecodeError>> {
	let mut out = Vec::new();
	for chunk in split_documents(stream) {
		match serde_saphyr::from_multiple_with_options::<JsonValue>(chunk, parse_options()) {
			Ok(values) => out.extend(values.into_iter().map(Ok)),
			Err(e) => out.push(Err(DecodeError::Yaml(e.to_string()))),
		}
	}
	out
}

fn decode_json(stream: &str) -> Vec<Result<JsonValue, DecodeError>> {
	let mut out = Vec::new();
	for value in serde_json::Deserializer::from_str(stream).into_iter::<JsonValue>() {
		match value {
			Ok(v) => out.push(Ok(v)),
			Err(e) => {
				// The json stream cannot be resynchronised after an error
				out.push(Err(DecodeError::Json(e)));
				break;
			}
		}
	}
	out
}

/// Serialize a JSON value to a YAML document.
#[instrument(skip_all)]
pub fn to_yaml(value: &JsonValue) -> Result<String, serde_saphyr::ser_error::Error> {
	let options = serde_saphyr::SerializerOptions {
		indent_step: 2,
		indent_array: Some(0),
		prefer_block_scalars: true,
		empty_map_as_braces: true,
		empty_array_as_brackets: true,
		line_width: Some(80),
		quote_ambiguous_keys: true,
		quote_numeric_strings: true,
		..Default::default()
	};

	let mut output = String::new();
	serde_saphyr::to_fmt_writer_with_options(&mut output, value, options)?;
	Ok(output)
}

/// Serialize values into one multi-document stream, each document prefixed
/// by `---`.
pub fn to_document_stream<'a>(
	values: impl IntoIterator<Item = &'a JsonValue>,
) -> Result<String, serde_saphyr::ser_error::Error> {
	let mut stream = String::new();
	for value in values {
		stream.push_str("---\n");
		let document = to_yaml(value)?;
		stream.push_str(&document);
		if !document.ends_with('\n') {
			stream.push('\n');
		}
	}
	Ok(stream)
}
