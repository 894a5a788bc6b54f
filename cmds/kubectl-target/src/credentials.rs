//! Credential acquisition for target groups.
//!
//! A credential document is an opaque kubeconfig. It is fetched once per
//! group, handed to the dispatcher and dropped with it.

use std::{collections::BTreeMap, fmt, fs, io, path::PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::instrument;

use crate::runner::{CommandRunner, Invocation, RunnerError};

/// kubectl subcommand under which credential plugins are installed, i.e.
/// `kubectl credentials gke` runs `kubectl-credentials-gke`.
pub const PLUGIN_SUBCOMMAND: &str = "credentials";

/// Opaque kubeconfig text.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialDocument(String);

impl CredentialDocument {
	pub fn new(text: impl Into<String>) -> Self {
		Self(text.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn as_bytes(&self) -> &[u8] {
		self.0.as_bytes()
	}
}

impl fmt::Debug for CredentialDocument {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "CredentialDocument({} bytes, redacted)", self.0.len())
	}
}

/// A provider together with the options it was asked for, for messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
	pub provider: String,
	pub options: IndexMap<String, String>,
}

impl Target {
	pub fn new(provider: &str, options: &IndexMap<String, String>) -> Self {
		Self {
			provider: provider.to_string(),
			options: options.clone(),
		}
	}
}

impl fmt::Display for Target {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "provider {}", self.provider)?;
		if self.options.is_empty() {
			return write!(f, " (no options)");
		}
		let options: Vec<String> = self.options.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
		write!(f, " ({})", options.join(", "))
	}
}

#[derive(Debug, Error)]
pub enum CredentialError {
	#[error("fetching credentials for {target}")]
	Run {
		target: Target,
		#[source]
		source: RunnerError,
	},

	#[error("credential provider for {target} exited with code {code}")]
	Failed { target: Target, code: i32 },

	#[error("credential provider for {target} printed invalid UTF-8")]
	NotUtf8 { target: Target },

	#[error("credential provider for {target} printed no kubeconfig")]
	Empty { target: Target },

	#[error("reading kubeconfig {} for {target}", path.display())]
	Read {
		target: Target,
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("no kubeconfig configured for {target}")]
	NotConfigured { target: Target },
}

impl CredentialError {
	/// The underlying runner failure, if the provider could not be run at all.
	pub fn runner_error(&self) -> Option<&RunnerError> {
		match self {
			CredentialError::Run { source, .. } => Some(source),
			_ => None,
		}
	}
}

/// Source of credentials for a provider and its options.
pub trait CredentialBroker {
	/// Fetch credentials. `options` are in slot order.
	fn fetch(
		&self,
		provider: &str,
		options: &IndexMap<String, String>,
	) -> Result<CredentialDocument, CredentialError>;
}

impl<B: CredentialBroker + ?Sized> CredentialBroker for &B {
	fn fetch(
		&self,
		provider: &str,
		options: &IndexMap<String, String>,
	) -> Result<CredentialDocument, CredentialError> {
		(**self).fetch(provider, options)
	}
}

fn non_empty(text: String, target: &Target) -> Result<CredentialDocument, CredentialError> {
	if text.trim().is_empty() {
		return Err(CredentialError::Empty {
			target: target.clone(),
		});
	}
	Ok(CredentialDocument(text))
}

/// Asks kubectl credential plugins: `kubectl credentials <provider> --<key> <value>...`.
pub struct PluginBroker<'a, R> {
	runner: &'a R,
	kubectl: &'a str,
}

impl<'a, R: CommandRunner> PluginBroker<'a, R> {
	pub fn new(runner: &'a R, kubectl: &'a str) -> Self {
		Self { runner, kubectl }
	}

	pub fn invocation(&self, provider: &str, options: &IndexMap<String, String>) -> Invocation {
		let mut args = vec![PLUGIN_SUBCOMMAND.to_string(), provider.to_string()];
		for (key, value) in options {
			args.push(format!("--{key}"));
			args.push(value.clone());
		}
		Invocation::new(self.kubectl, args).capture_stdout()
	}
}

impl<R: CommandRunner> CredentialBroker for PluginBroker<'_, R> {
	#[instrument(skip_all, fields(provider = %provider))]
	fn fetch(
		&self,
		provider: &str,
		options: &IndexMap<String, String>,
	) -> Result<CredentialDocument, CredentialError> {
		let target = Target::new(provider, options);
		let completed = self
			.runner
			.run(&self.invocation(provider, options))
			.map_err(|source| CredentialError::Run {
				target: target.clone(),
				source,
			})?;

		if !completed.success() {
			return Err(CredentialError::Failed {
				target,
				code: completed.code,
			});
		}

		let text = String::from_utf8(completed.stdout).map_err(|_| CredentialError::NotUtf8 {
			target: target.clone(),
		})?;
		tracing::debug!(bytes = text.len(), "received credentials");
		non_empty(text, &target)
	}
}

/// Reads kubeconfig files configured per provider. Options are ignored.
#[derive(Debug, Clone, Default)]
pub struct StaticBroker {
	kubeconfigs: BTreeMap<String, PathBuf>,
}

impl StaticBroker {
	pub fn new(kubeconfigs: BTreeMap<String, PathBuf>) -> Self {
		Self { kubeconfigs }
	}

	pub fn provides(&self, provider: &str) -> bool {
		self.kubeconfigs.contains_key(provider)
	}
}

impl CredentialBroker for StaticBroker {
	#[instrument(skip_all, fields(provider = %provider))]
	fn fetch(
		&self,
		provider: &str,
		options: &IndexMap<String, String>,
	) -> Result<CredentialDocument, CredentialError> {
		let target = Target::new(provider, options);
		let Some(path) = self.kubeconfigs.get(provider) else {
			return Err(CredentialError::NotConfigured { target });
		};

		tracing::debug!(path = %path.display(), "reading configured kubeconfig");
		let text = fs::read_to_string(path).map_err(|source| CredentialError::Read {
			target: target.clone(),
			path: path.clone(),
			source,
		})?;
		non_empty(text, &target)
	}
}

/// Static kubeconfigs for the providers that have one, plugins for the rest.
pub struct ConfiguredBroker<B> {
	configured: StaticBroker,
	fallback: B,
}

impl<B: CredentialBroker> ConfiguredBroker<B> {
	pub fn new(configured: StaticBroker, fallback: B) -> Self {
		Self {
			configured,
			fallback,
		}
	}
}

impl<B: CredentialBroker> CredentialBroker for ConfiguredBroker<B> {
	fn fetch(
		&self,
		provider: &str,
		options: &IndexMap<String, String>,
	) -> Result<CredentialDocument, CredentialError> {
		if self.configured.provides(provider) {
			self.configured.fetch(provider, options)
		} else {
			self.fallback.fetch(provider, options)
		}
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use assert_matches::assert_matches;
	use tempfile::NamedTempFile;

	use super::*;
	use crate::test_utils::FakeRunner;

	const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\n";

	fn options(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
		pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
	}

	#[test]
	fn test_plugin_receives_options_in_slot_order() {
		let runner = FakeRunner::default().respond_to("credentials", 0, KUBECONFIG);
		let broker = PluginBroker::new(&runner, "kubectl");

		let doc = broker
			.fetch("gke", &options(&[("region", "eu"), ("cluster", "prod")]))
			.unwrap();

		assert_eq!(doc.as_str(), KUBECONFIG);
		let calls = runner.calls();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0].program, "kubectl");
		assert_eq!(
			calls[0].args,
			vec!["credentials", "gke", "--region", "eu", "--cluster", "prod"]
		);
		assert!(calls[0].capture_stdout);
	}

	#[test]
	fn test_plugin_failure_names_target() {
		let runner = FakeRunner::default().respond_to("credentials", 1, "");
		let err = PluginBroker::new(&runner, "kubectl")
			.fetch("gke", &options(&[("cluster", "prod")]))
			.unwrap_err();

		assert_matches!(err, CredentialError::Failed { code: 1, .. });
		assert_eq!(
			err.to_string(),
			r#"credential provider for provider gke (cluster="prod") exited with code 1"#
		);
	}

	#[test]
	fn test_plugin_empty_output_is_a_failure() {
		let runner = FakeRunner::default().respond_to("credentials", 0, "\n");
		let err = PluginBroker::new(&runner, "kubectl")
			.fetch("local", &IndexMap::new())
			.unwrap_err();
		assert_matches!(err, CredentialError::Empty { .. });
		assert_eq!(err.to_string(), "credential provider for provider local (no options) printed no kubeconfig");
	}

	#[test]
	fn test_plugin_invalid_utf8() {
		let runner = FakeRunner::default().respond_to("credentials", 0, vec![0xff, 0xfe]);
		let err = PluginBroker::new(&runner, "kubectl")
			.fetch("local", &IndexMap::new())
			.unwrap_err();
		assert_matches!(err, CredentialError::NotUtf8 { .. });
	}

	#[test]
	fn test_plugin_start_failure() {
		let runner = FakeRunner::default().fail_to_start("credentials");
		let err = PluginBroker::new(&runner, "kubectl")
			.fetch("local", &IndexMap::new())
			.unwrap_err();
		assert_matches!(err.runner_error(), Some(RunnerError::Spawn { .. }));
	}

	#[test]
	fn test_configured_broker_prefers_static_kubeconfig() {
		let mut file = NamedTempFile::new().unwrap();
		file.write_all(KUBECONFIG.as_bytes()).unwrap();

		let runner = FakeRunner::default().respond_to("credentials", 0, "from: plugin\n");
		let broker = ConfiguredBroker::new(
			StaticBroker::new(BTreeMap::from([("local".to_string(), file.path().to_path_buf())])),
			PluginBroker::new(&runner, "kubectl"),
		);

		let local = broker.fetch("local", &IndexMap::new()).unwrap();
		assert_eq!(local.as_str(), KUBECONFIG);
		assert!(runner.calls().is_empty());

		let gke = broker.fetch("gke", &options(&[("cluster", "a")])).unwrap();
		assert_eq!(gke.as_str(), "from: plugin\n");
		assert_eq!(runner.calls().len(), 1);
	}

	#[test]
	fn test_static_broker_missing_file() {
		let broker = StaticBroker::new(BTreeMap::from([(
			"local".to_string(),
			PathBuf::from("/nonexistent/kubeconfig"),
		)]));
		assert_matches!(
			broker.fetch("local", &IndexMap::new()),
			Err(CredentialError::Read { .. })
		);
		assert_matches!(
			broker.fetch("gke", &IndexMap::new()),
			Err(CredentialError::NotConfigured { .. })
		);
	}

	#[test]
	fn test_debug_is_redacted() {
		let doc = CredentialDocument::new("token: secret");
		assert_eq!(format!("{doc:?}"), "CredentialDocument(13 bytes, redacted)");
	}
}
