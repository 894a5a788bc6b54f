//! Applying finalized groups, one kubectl invocation each.

use std::io::{self, Write};

use thiserror::Error;
use tracing::{info, instrument};

use crate::{
	args::{FlagRole, ParsedArgs},
	credentials::{CredentialBroker, CredentialDocument, CredentialError},
	route::Group,
	runner::{CommandRunner, Invocation, RunnerError},
	signals, yaml,
};

const KUBECONFIG_FLAG: &str = "--kubeconfig";

#[derive(Debug, Error)]
pub enum DispatchError {
	/// kubectl ran and failed; its output already reached the operator.
	#[error("apply for {group} exited with code {code}")]
	ApplyFailed { group: String, code: i32 },

	#[error(transparent)]
	Credential(#[from] CredentialError),

	#[error("serializing resources for {group}")]
	Serialize {
		group: String,
		#[source]
		source: serde_saphyr::ser_error::Error,
	},

	#[error("writing temporary kubeconfig")]
	TempFile(#[source] io::Error),

	#[error("temporary kubeconfig path {0} is not valid UTF-8")]
	NonUtf8Path(String),

	#[error("applying {group}")]
	Runner {
		group: String,
		#[source]
		source: RunnerError,
	},
}

/// Arguments for one group's apply: input and kubeconfig flags are replaced
/// by `--kubeconfig <path>` in front and `-f -` after the remaining flags.
pub fn rewrite_for_group(args: &ParsedArgs, kubeconfig: &str) -> Vec<String> {
	let mut out = vec![KUBECONFIG_FLAG.to_string(), kubeconfig.to_string()];
	out.extend(args.to_args_with(|role| role.is_input() || role == FlagRole::Kubeconfig, &["-f", "-"]));
	out
}

/// A kubeconfig written to disk for the duration of one apply.
///
/// The file is created owner-only and removed when the guard is dropped, or
/// by the signal listener if the router is interrupted first.
struct ScopedKubeconfig {
	file: tempfile::NamedTempFile,
	_tracked: signals::Tracked,
}

impl ScopedKubeconfig {
	fn write(document: &CredentialDocument) -> Result<Self, DispatchError> {
		let (mut file, tracked) = signals::track(
			|| tempfile::Builder::new().prefix("kubectl-target-").suffix(".kubeconfig").tempfile(),
			|file| file.path(),
		)
		.map_err(DispatchError::TempFile)?;
		file.write_all(document.as_bytes()).map_err(DispatchError::TempFile)?;
		file.flush().map_err(DispatchError::TempFile)?;
		Ok(Self {
			file,
			_tracked: tracked,
		})
	}

	fn path(&self) -> Result<&str, DispatchError> {
		let path = self.file.path();
		path.to_str()
			.ok_or_else(|| DispatchError::NonUtf8Path(path.display().to_string()))
	}

	fn remove(self) -> Result<(), DispatchError> {
		self.file.close().map_err(DispatchError::TempFile)
	}
}

pub struct Dispatcher<'a, R, B> {
	runner: &'a R,
	broker: &'a B,
	kubectl: &'a str,
}

impl<'a, R: CommandRunner, B: CredentialBroker> Dispatcher<'a, R, B> {
	pub fn new(runner: &'a R, broker: &'a B, kubectl: &'a str) -> Self {
		Self {
			runner,
			broker,
			kubectl,
		}
	}

	/// Apply every group in order, stopping at the first failure.
	///
	/// Groups applied before a failure stay applied.
	pub fn dispatch_all(&self, args: &ParsedArgs, groups: Vec<Group>) -> Result<(), DispatchError> {
		let total = groups.len();
		for (idx, group) in groups.into_iter().enumerate() {
			info!(group = %group, resources = group.resources.len(), "applying group {}/{}", idx + 1, total);
			self.dispatch(args, &group)?;
		}
		Ok(())
	}

	#[instrument(skip_all, fields(provider = %group.provider))]
	pub fn dispatch(&self, args: &ParsedArgs, group: &Group) -> Result<(), DispatchError> {
		let document = self.broker.fetch(&group.provider, &group.options)?;

		let stream = yaml::to_document_stream(group.resources.iter().map(|r| r.raw())).map_err(|source| {
			DispatchError::Serialize {
				group: group.to_string(),
				source,
			}
		})?;

		let kubeconfig = ScopedKubeconfig::write(&document)?;
		let invocation = Invocation::new(self.kubectl, rewrite_for_group(args, kubeconfig.path()?)).stdin(stream);
		tracing::debug!(args = ?invocation.args, "running apply");

		let completed = self.runner.run(&invocation).map_err(|source| DispatchError::Runner {
			group: group.to_string(),
			source,
		})?;
		kubeconfig.remove()?;

		if !completed.success() {
			return Err(DispatchError::ApplyFailed {
				group: group.to_string(),
				code: completed.code,
			});
		}
		Ok(())
	}
}
