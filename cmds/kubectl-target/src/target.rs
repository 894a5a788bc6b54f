//! One kubectl-target run: gate, ingest, route, dispatch.

use std::{collections::BTreeMap, io::Read, path::PathBuf};

use thiserror::Error;
use tracing::{info, instrument};

use crate::{
	credentials::{ConfiguredBroker, CredentialError, PluginBroker, StaticBroker},
	dispatch::{DispatchError, Dispatcher},
	gate::{self, Decision},
	ingest::{IngestError, Ingestor},
	route::{self, AnnotationScheme, RouteError, DEFAULT_ANNOTATION_PREFIX},
	runner::{CommandRunner, Invocation, RunnerError},
};

/// Exit code for failures of the router itself.
pub const ROUTER_FAILURE: i32 = 3;

/// Exit code when a child process could not be started, as in shells.
pub const NOT_STARTED: i32 = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOpts {
	pub kubectl: String,
	pub annotation_prefix: String,
	pub continue_on_error: bool,
	/// Providers served from a static kubeconfig instead of a plugin.
	pub kubeconfigs: BTreeMap<String, PathBuf>,
}

impl Default for TargetOpts {
	fn default() -> Self {
		Self {
			kubectl: "kubectl".to_string(),
			annotation_prefix: DEFAULT_ANNOTATION_PREFIX.to_string(),
			continue_on_error: false,
			kubeconfigs: BTreeMap::new(),
		}
	}
}

#[derive(Debug, Error)]
pub enum TargetError {
	#[error("forwarding to kubectl")]
	Forward(#[source] RunnerError),

	#[error(transparent)]
	Ingest(#[from] IngestError),

	#[error("no objects passed to apply")]
	NoObjects,

	#[error(transparent)]
	Route(#[from] RouteError),

	#[error(transparent)]
	Dispatch(#[from] DispatchError),
}

impl TargetError {
	/// Exit code of a downstream apply or credential plugin that ran and failed.
	///
	/// The child has already reported the failure on stderr in that case.
	pub fn downstream_code(&self) -> Option<i32> {
		match self {
			TargetError::Dispatch(
				DispatchError::ApplyFailed { code, .. } | DispatchError::Credential(CredentialError::Failed { code, .. }),
			) => Some(*code),
			_ => None,
		}
	}

	pub fn exit_code(&self) -> i32 {
		if let Some(code) = self.downstream_code() {
			return code;
		}
		let runner_error = match self {
			TargetError::Forward(e) => Some(e),
			TargetError::Ingest(IngestError::Kustomize { source, .. }) => Some(source),
			TargetError::Dispatch(DispatchError::Runner { source, .. }) => Some(source),
			TargetError::Dispatch(DispatchError::Credential(e)) => e.runner_error(),
			_ => None,
		};
		match runner_error {
			Some(RunnerError::Spawn { .. }) => NOT_STARTED,
			_ => ROUTER_FAILURE,
		}
	}
}

/// Run kubectl with `forwarded`, routing apply invocations per target.
///
/// Returns the exit code for the process: kubectl's own code when the
/// invocation was forwarded, 0 when every group applied.
#[instrument(skip_all, fields(subcommand = forwarded.first().map(String::as_str).unwrap_or_default()))]
pub fn run<R: CommandRunner>(
	runner: &R,
	opts: &TargetOpts,
	forwarded: &[String],
	stdin: Box<dyn Read + '_>,
) -> Result<i32, TargetError> {
	let invocation = match gate::decide(forwarded) {
		Decision::Forward(reason) => {
			info!(%reason, "forwarding to kubectl unchanged");
			let completed = runner
				.run(&Invocation::new(&opts.kubectl, forwarded))
				.map_err(TargetError::Forward)?;
			return Ok(completed.code);
		}
		Decision::Intercept(invocation) => invocation,
	};

	let resources = Ingestor::new(runner, &opts.kubectl, &invocation, stdin)
		.collect_resources(opts.continue_on_error)?;
	if resources.is_empty() {
		return Err(TargetError::NoObjects);
	}

	let scheme = AnnotationScheme::new(opts.annotation_prefix.as_str());
	let total = resources.len();
	let groups = route::group(route::classify_all(&scheme, resources)?);
	info!(resources = total, groups = groups.len(), "routed resources");

	let broker = ConfiguredBroker::new(
		StaticBroker::new(opts.kubeconfigs.clone()),
		PluginBroker::new(runner, &opts.kubectl),
	);
	Dispatcher::new(runner, &broker, &opts.kubectl).dispatch_all(&invocation.args, groups)?;
	Ok(0)
}
