//! `kubectl credentials gke`: GKE cluster credentials from gcloud.
//!
//! Resources select their cluster with
//!
//! ```yaml
//! kubectl-target/provider: gke
//! kubectl-target/gke/project: my-project
//! kubectl-target/gke/region: europe-west1
//! kubectl-target/gke/cluster: prod
//! ```
//!
//! gcloud writes the credentials into a throwaway kubeconfig, which is then
//! printed to stdout.

use std::{
	fs,
	io::{self, Write},
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use kubectl_target::{
	runner::{CommandRunner, Invocation, ProcessRunner},
	telemetry,
};
use tracing::{instrument, Level};

#[derive(Parser)]
#[command(name = "kubectl-credentials-gke")]
#[command(about = "Kubeconfig for a GKE cluster, fetched with gcloud", long_about = None)]
#[command(version)]
struct Cli {
	/// Project ID
	#[arg(long)]
	project: String,

	/// Region (or zone) of the cluster
	#[arg(long)]
	region: String,

	/// Cluster name
	#[arg(long)]
	cluster: String,

	/// gcloud binary
	#[arg(long, env = "KUBECTL_CREDENTIALS_GCLOUD", default_value = "gcloud")]
	gcloud: String,

	/// Log level (falls back to RUST_LOG, then warn)
	#[arg(long)]
	log_level: Option<Level>,
}

/// `gcloud container clusters get-credentials`, writing to `kubeconfig`.
fn get_credentials(cli: &Cli, kubeconfig: &str) -> Invocation {
	Invocation::new(
		&cli.gcloud,
		[
			"container",
			"clusters",
			"get-credentials",
			cli.cluster.as_str(),
			"--region",
			cli.region.as_str(),
			"--project",
			cli.project.as_str(),
		],
	)
	.env("KUBECONFIG", kubeconfig)
	// gcloud reports progress on stdout, which is reserved for the kubeconfig
	.capture_stdout()
}

#[instrument(skip_all, fields(project = %cli.project, region = %cli.region, cluster = %cli.cluster))]
fn fetch(runner: &impl CommandRunner, cli: &Cli) -> Result<String> {
	let dir = tempfile::Builder::new()
		.prefix("kubectl-credentials-gke-")
		.tempdir()
		.context("failed to create temporary directory")?;
	let path = dir.path().join("kubeconfig");
	let Some(path_str) = path.to_str() else {
		bail!("temporary path {} is not valid UTF-8", path.display());
	};

	let completed = runner.run(&get_credentials(cli, path_str))?;
	if !completed.success() {
		bail!("gcloud exited with code {}", completed.code);
	}

	let kubeconfig = fs::read_to_string(&path)
		.with_context(|| format!("gcloud did not write a kubeconfig to {}", path.display()))?;
	tracing::debug!(bytes = kubeconfig.len(), "received kubeconfig");
	Ok(kubeconfig)
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	telemetry::init(cli.log_level)?;

	let kubeconfig = fetch(&ProcessRunner, &cli)?;
	io::stdout()
		.lock()
		.write_all(kubeconfig.as_bytes())
		.context("failed to write kubeconfig")
}
