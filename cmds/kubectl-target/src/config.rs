//! Configuration file support for kubectl-target
//!
//! Supports `.kubectl-target.yaml` files that can be placed anywhere in the
//! directory hierarchy. kubectl-target searches from the current directory
//! upward to the filesystem root.
//!
//! ```yaml
//! kubectl: /usr/local/bin/kubectl
//! annotationPrefix: deploy.example.com
//! continueOnError: true
//! providers:
//!   local:
//!     kubeconfig: ~/.kube/kind.yaml
//! ```

use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{route::DEFAULT_ANNOTATION_PREFIX, target::TargetOpts};

/// The name of the config file kubectl-target looks for
pub const CONFIG_FILE_NAME: &str = ".kubectl-target.yaml";

/// Root configuration structure for .kubectl-target.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
	/// kubectl binary used for applies, plugins and kustomize builds
	#[serde(default)]
	pub kubectl: Option<String>,

	#[serde(default)]
	pub annotation_prefix: Option<String>,

	/// Skip malformed manifest documents instead of failing
	#[serde(default)]
	pub continue_on_error: Option<bool>,

	#[serde(default)]
	pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProviderConfig {
	/// Static kubeconfig used instead of the provider's credential plugin.
	/// Relative paths are resolved against the config file's directory.
	#[serde(default)]
	pub kubeconfig: Option<PathBuf>,
}

/// Settings given on the command line (or through their environment variables).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
	pub kubectl: Option<String>,
	pub annotation_prefix: Option<String>,
	pub continue_on_error: bool,
}

impl FileConfig {
	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>> {
		match find_config_file(start_dir) {
			Some(config_path) => Ok(Some(Self::load_from_file(&config_path)?)),
			None => Ok(None),
		}
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		let mut config: FileConfig = if content.trim().is_empty() {
			FileConfig::default()
		} else {
			serde_yaml_with_quirks::from_str(&content)
				.with_context(|| format!("failed to parse config file: {}", path.display()))?
		};

		if let Some(base) = path.parent() {
			config.resolve_paths(base);
		}
		Ok(config)
	}

	fn resolve_paths(&mut self, base: &Path) {
		for provider in self.providers.values_mut() {
			if let Some(kubeconfig) = &mut provider.kubeconfig {
				*kubeconfig = expand_home(kubeconfig);
				if kubeconfig.is_relative() {
					*kubeconfig = base.join(&*kubeconfig);
				}
			}
		}
	}

	/// Combine with command line settings: command line over file over defaults.
	pub fn into_opts(self, overrides: Overrides) -> TargetOpts {
		TargetOpts {
			kubectl: overrides
				.kubectl
				.or(self.kubectl)
				.unwrap_or_else(|| "kubectl".to_string()),
			annotation_prefix: overrides
				.annotation_prefix
				.or(self.annotation_prefix)
				.unwrap_or_else(|| DEFAULT_ANNOTATION_PREFIX.to_string()),
			continue_on_error: overrides.continue_on_error || self.continue_on_error.unwrap_or(false),
			kubeconfigs: self
				.providers
				.into_iter()
				.filter_map(|(name, provider)| provider.kubeconfig.map(|path| (name, path)))
				.collect(),
		}
	}
}

fn expand_home(path: &Path) -> PathBuf {
	match (path.strip_prefix("~"), std::env::var_os("HOME")) {
		(Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
		_ => path.to_path_buf(),
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let mut current = start_dir.to_path_buf();

	// Canonicalize if possible to handle relative paths
	if let Ok(canonical) = current.canonicalize() {
		current = canonical;
	}

	loop {
		let config_path = current.join(CONFIG_FILE_NAME);
		if config_path.is_file() {
			return Some(config_path);
		}
		if !current.pop() {
			return None;
		}
	}
}
