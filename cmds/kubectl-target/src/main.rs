use std::{env, io, path::PathBuf, process::ExitCode};

use anyhow::{bail, Context, Result};
use clap::{error::ErrorKind, Parser};
use kubectl_target::{
	config::{FileConfig, Overrides},
	runner::ProcessRunner,
	signals,
	target::{self, TargetOpts, ROUTER_FAILURE},
	telemetry,
};
use tracing::Level;

const MISSING_DASH: &str = "missing '--'.
You must supply arguments to be forwarded to kubectl using '--'. Example:
	cat my_yaml.yml | kubectl-target -- apply -f -";

#[derive(Parser)]
#[command(name = "kubectl-target")]
#[command(about = "Apply manifests to the clusters named in their annotations", long_about = None)]
#[command(version)]
struct Cli {
	/// kubectl binary used for forwarding, applies and credential plugins
	#[arg(long, env = "KUBECTL_TARGET_KUBECTL")]
	kubectl: Option<String>,

	/// Prefix of the routing annotations [default: kubectl-target]
	#[arg(long)]
	annotation_prefix: Option<String>,

	/// Skip manifest documents that cannot be read as resources
	#[arg(long)]
	continue_on_error: bool,

	/// Config file, instead of searching for .kubectl-target.yaml
	#[arg(long)]
	config: Option<PathBuf>,

	/// Log level (falls back to RUST_LOG, then warn)
	#[arg(long)]
	log_level: Option<Level>,

	/// Arguments forwarded to kubectl
	#[arg(last = true, value_name = "KUBECTL_ARGS")]
	forwarded: Vec<String>,
}

fn load_opts(cli: &Cli) -> Result<TargetOpts> {
	let file = match &cli.config {
		Some(path) => FileConfig::load_from_file(path)?,
		None => {
			let cwd = env::current_dir().context("failed to determine current directory")?;
			FileConfig::load_from_directory(&cwd)?.unwrap_or_default()
		}
	};
	tracing::debug!(?file, "loaded configuration");

	Ok(file.into_opts(Overrides {
		kubectl: cli.kubectl.clone(),
		annotation_prefix: cli.annotation_prefix.clone(),
		continue_on_error: cli.continue_on_error,
	}))
}

fn run(cli: Cli) -> Result<i32> {
	telemetry::init(cli.log_level)?;
	signals::install()?;

	if cli.forwarded.is_empty() {
		bail!(MISSING_DASH);
	}
	let opts = load_opts(&cli)?;

	match target::run(&ProcessRunner, &opts, &cli.forwarded, Box::new(io::stdin())) {
		Ok(code) => Ok(code),
		Err(e) => {
			let code = e.exit_code();
			eprintln!("error: {:#}", anyhow::Error::new(e));
			Ok(code)
		}
	}
}

fn exit_code(code: i32) -> ExitCode {
	ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}

fn main() -> ExitCode {
	let cli = match Cli::try_parse() {
		Ok(cli) => cli,
		Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
		Err(e) => {
			let _ = e.print();
			if !env::args().any(|arg| arg == "--") {
				eprintln!("error: {MISSING_DASH}");
			}
			return exit_code(ROUTER_FAILURE);
		}
	};

	match run(cli) {
		Ok(code) => exit_code(code),
		Err(e) => {
			eprintln!("error: {e:#}");
			exit_code(ROUTER_FAILURE)
		}
	}
}
