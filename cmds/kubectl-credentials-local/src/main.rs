//! `kubectl credentials local`: a kubeconfig for an unsecured local cluster,
//! such as one started by `hack/local-up-cluster.sh`.
//!
//! `--server` and `--certs-dir` can be set per resource through
//! `kubectl-target/local/server` and `kubectl-target/local/certs-dir`.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use indoc::formatdoc;
use kubectl_target::telemetry;
use tracing::Level;

#[derive(Parser)]
#[command(name = "kubectl-credentials-local")]
#[command(about = "Generic unverified kubeconfig for local unsecured clusters", long_about = None)]
#[command(version)]
struct Cli {
	/// API server address
	#[arg(long, default_value = "https://localhost:6443")]
	server: String,

	/// Directory holding server-ca.crt, client-admin.crt and client-admin.key
	#[arg(long, default_value = "/var/run/kubernetes")]
	certs_dir: String,

	/// Log level (falls back to RUST_LOG, then warn)
	#[arg(long)]
	log_level: Option<Level>,
}

fn kubeconfig(server: &str, certs_dir: &str) -> String {
	let certs_dir = certs_dir.trim_end_matches('/');
	formatdoc! {"
		apiVersion: v1
		kind: Config
		clusters:
		- cluster:
		    certificate-authority: {certs_dir}/server-ca.crt
		    server: {server}
		  name: local
		contexts:
		- context:
		    cluster: local
		    user: myself
		  name: local
		current-context: local
		preferences: {{}}
		users:
		- name: myself
		  user:
		    client-certificate: {certs_dir}/client-admin.crt
		    client-key: {certs_dir}/client-admin.key
	"}
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	telemetry::init(cli.log_level)?;

	tracing::debug!(server = %cli.server, "printing local kubeconfig");
	io::stdout()
		.lock()
		.write_all(kubeconfig(&cli.server, &cli.certs_dir).as_bytes())
		.context("failed to write kubeconfig")
}
