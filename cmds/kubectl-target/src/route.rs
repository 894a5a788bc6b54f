//! Routing of resources to target groups.
//!
//! Resources carry their target in annotations:
//!
//! ```yaml
//! metadata:
//!   annotations:
//!     kubectl-target/provider: gke
//!     kubectl-target/gke/project: my-project
//!     kubectl-target/gke/cluster: prod
//! ```
//!
//! Routing runs in two phases. [`classify_all`] reads provider and options off
//! every resource and fails if any resource is unroutable. [`group`] then folds
//! the classified resources through a [`Grouper`], which needs no I/O and
//! cannot fail. Nothing can be dispatched before both phases have completed.

use std::{collections::BTreeMap, fmt};

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::resource::Resource;

pub const DEFAULT_ANNOTATION_PREFIX: &str = "kubectl-target";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
	#[error("{} missing annotation {annotation}: {}", subject(.resources), .resources.join(", "))]
	MissingProvider {
		annotation: String,
		resources: Vec<String>,
	},

	#[error("{resource} has an empty option name in annotation {annotation}")]
	EmptyOptionKey { resource: String, annotation: String },
}

fn subject(resources: &[String]) -> &'static str {
	if resources.len() == 1 {
		"resource is"
	} else {
		"resources are"
	}
}

/// Annotation names used for routing, all under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationScheme {
	prefix: String,
}

impl Default for AnnotationScheme {
	fn default() -> Self {
		Self::new(DEFAULT_ANNOTATION_PREFIX)
	}
}

impl AnnotationScheme {
	pub fn new(prefix: impl Into<String>) -> Self {
		let mut prefix = prefix.into();
		while prefix.ends_with('/') {
			prefix.pop();
		}
		Self { prefix }
	}

	/// `<prefix>/provider`
	pub fn provider_key(&self) -> String {
		format!("{}/provider", self.prefix)
	}

	/// `<prefix>/<provider>/`, the namespace of a provider's options.
	pub fn option_prefix(&self, provider: &str) -> String {
		format!("{}/{}/", self.prefix, provider)
	}
}

/// A resource together with its routing information.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
	pub provider: String,
	/// Options in lexical key order.
	pub options: BTreeMap<String, String>,
	pub resource: Resource,
}

/// Read provider and options off a resource.
pub fn classify(scheme: &AnnotationScheme, resource: Resource) -> Result<Classified, RouteError> {
	let provider_key = scheme.provider_key();
	let provider = match resource.annotation(&provider_key) {
		Some(p) if !p.trim().is_empty() => p.to_string(),
		_ => {
			return Err(RouteError::MissingProvider {
				annotation: provider_key,
				resources: vec![resource.to_string()],
			})
		}
	};

	let option_prefix = scheme.option_prefix(&provider);
	let mut options = BTreeMap::new();
	for (key, value) in resource.annotations() {
		let Some(option) = key.strip_prefix(&option_prefix) else {
			continue;
		};
		if option.is_empty() {
			return Err(RouteError::EmptyOptionKey {
				resource: resource.to_string(),
				annotation: key.clone(),
			});
		}
		options.insert(option.to_string(), value.clone());
	}

	Ok(Classified {
		provider,
		options,
		resource,
	})
}

/// Classify every resource, reporting all resources without a provider at once.
pub fn classify_all(
	scheme: &AnnotationScheme,
	resources: Vec<Resource>,
) -> Result<Vec<Classified>, RouteError> {
	let mut classified = Vec::with_capacity(resources.len());
	let mut missing = Vec::new();
	for resource in resources {
		match classify(scheme, resource) {
			Ok(c) => classified.push(c),
			Err(RouteError::MissingProvider { resources, .. }) => missing.extend(resources),
			Err(e) => return Err(e),
		}
	}

	if !missing.is_empty() {
		return Err(RouteError::MissingProvider {
			annotation: scheme.provider_key(),
			resources: missing,
		});
	}
	Ok(classified)
}

/// Identity of a group: provider plus option values by slot.
///
/// Absent options are `None` and trailing `None`s are trimmed, so a key
/// computed before a provider gained more slots equals one computed after.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
	pub provider: String,
	pub values: Vec<Option<String>>,
}

/// Resources that are applied together with one set of credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
	pub provider: String,
	/// Options in slot order.
	pub options: IndexMap<String, String>,
	pub resources: Vec<Resource>,
}

impl fmt::Display for Group {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "provider={}", self.provider)?;
		for (key, value) in &self.options {
			write!(f, " {key}={value}")?;
		}
		Ok(())
	}
}

/// Assigns resources to groups.
///
/// Option keys get tuple slots per provider in first-seen order: the first
/// resource classified under a provider fixes the slots of its keys, and
/// unseen keys on later resources take the next free slot. Groups are kept
/// in the order their first resource arrived.
#[derive(Debug, Default)]
pub struct Grouper {
	slots: IndexMap<String, IndexSet<String>>,
	groups: IndexMap<GroupKey, Group>,
}

impl Grouper {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn assign(&mut self, provider: &str, options: &BTreeMap<String, String>, resource: Resource) {
		let slots = self.slots.entry(provider.to_string()).or_default();
		for key in options.keys() {
			slots.insert(key.clone());
		}

		let mut values: Vec<Option<String>> = slots.iter().map(|key| options.get(key).cloned()).collect();
		while values.last().is_some_and(Option::is_none) {
			values.pop();
		}

		let key = GroupKey {
			provider: provider.to_string(),
			values,
		};
		self.groups
			.entry(key)
			.or_insert_with(|| Group {
				provider: provider.to_string(),
				options: slots
					.iter()
					.filter_map(|k| options.get(k).map(|v| (k.clone(), v.clone())))
					.collect(),
				resources: Vec::new(),
			})
			.resources
			.push(resource);
	}

	/// Slot order of a provider's option keys.
	pub fn slots(&self, provider: &str) -> Option<&IndexSet<String>> {
		self.slots.get(provider)
	}

	pub fn finish(self) -> Vec<Group> {
		self.groups.into_values().collect()
	}
}

/// Partition classified resources into groups.
pub fn group(classified: Vec<Classified>) -> Vec<Group> {
	let mut grouper = Grouper::new();
	for c in classified {
		grouper.assign(&c.provider, &c.options, c.resource);
	}
	grouper.finish()
}
