//! Manifest resources as seen by the router.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Where a resource was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
	File { path: PathBuf, document: usize },
	Stdin { document: usize },
	Kustomize { dir: String, document: usize },
}

impl fmt::Display for Origin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Origin::File { path, document } => write!(f, "{} (document {})", path.display(), document),
			Origin::Stdin { document } => write!(f, "stdin (document {})", document),
			Origin::Kustomize { dir, document } => {
				write!(f, "kustomization {} (document {})", dir, document)
			}
		}
	}
}

/// Reasons a decoded document is not a usable resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
	#[error("document is not a mapping")]
	NotAMapping,

	#[error("manifest missing kind")]
	MissingKind,

	#[error("{kind} manifest missing metadata.name")]
	MissingName { kind: String },

	#[error("annotation {key} is not a string")]
	NonStringAnnotation { key: String },
}

/// One manifest entity.
///
/// The raw value is kept exactly as decoded and is what gets sent to kubectl;
/// the other fields are views used for routing and error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
	kind: String,
	name: String,
	namespace: Option<String>,
	annotations: BTreeMap<String, String>,
	raw: Value,
	origin: Origin,
}

impl Resource {
	pub fn from_value(raw: Value, origin: Origin) -> Result<Self, ResourceError> {
		let object = raw.as_object().ok_or(ResourceError::NotAMapping)?;

		let kind = object
			.get("kind")
			.and_then(Value::as_str)
			.filter(|k| !k.is_empty())
			.ok_or(ResourceError::MissingKind)?
			.to_string();

		let name = raw
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.filter(|n| !n.is_empty())
			.ok_or_else(|| ResourceError::MissingName { kind: kind.clone() })?
			.to_string();

		let namespace = raw
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.map(str::to_string);

		let mut annotations = BTreeMap::new();
		if let Some(map) = raw.pointer("/metadata/annotations").and_then(Value::as_object) {
			for (key, value) in map {
				match value {
					Value::String(s) => {
						annotations.insert(key.clone(), s.clone());
					}
					// kubectl drops null annotations before sending
					Value::Null => {}
					_ => return Err(ResourceError::NonStringAnnotation { key: key.clone() }),
				}
			}
		}

		Ok(Self {
			kind,
			name,
			namespace,
			annotations,
			raw,
			origin,
		})
	}

	pub fn kind(&self) -> &str {
		&self.kind
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn namespace(&self) -> Option<&str> {
		self.namespace.as_deref()
	}

	/// Annotations, in lexical key order.
	pub fn annotations(&self) -> &BTreeMap<String, String> {
		&self.annotations
	}

	pub fn annotation(&self, key: &str) -> Option<&str> {
		self.annotations.get(key).map(String::as_str)
	}

	pub fn raw(&self) -> &Value {
		&self.raw
	}

	pub fn origin(&self) -> &Origin {
		&self.origin
	}
}

impl fmt::Display for Resource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.namespace {
			Some(ns) => write!(f, "{}/{} in namespace {}", self.kind, self.name, ns)?,
			None => write!(f, "{}/{}", self.kind, self.name)?,
		}
		write!(f, " from {}", self.origin)
	}
}
