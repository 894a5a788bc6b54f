//! A fake kubectl for driving the kubectl-target binary end to end.
//!
//! The fake is a shell script that records each invocation in its own
//! numbered directory:
//! - `args`: one argument per line
//! - `stdin`: what an apply received
//! - `kubeconfig`: contents of the `--kubeconfig` file during the apply
//!
//! It answers `credentials <provider> ...` with a kubeconfig that echoes the
//! request, `kustomize <dir>` with `<dir>/all.yaml`, and exits with
//! `$FAKE_KUBECTL_EXIT` for everything else. An apply whose kubeconfig
//! mentions `$FAKE_KUBECTL_FAIL_ON` exits 5. With `$FAKE_KUBECTL_SLEEP` set,
//! an apply sleeps that many seconds after reading its input.

#![allow(dead_code)]

use std::{
	fs,
	io::Write,
	os::unix::fs::PermissionsExt,
	path::{Path, PathBuf},
	process::{Command, Output, Stdio},
};

use tempfile::TempDir;

const SCRIPT: &str = r#"#!/bin/sh
n=$(ls "$FAKE_KUBECTL_LOG" | wc -l | tr -d ' ')
call="$FAKE_KUBECTL_LOG/$(printf '%03d' "$n")"
mkdir "$call"
printf '%s\n' "$@" > "$call/args"

case "$1" in
credentials)
	printf 'apiVersion: v1\nkind: Config\n# %s\n' "$*"
	exit 0
	;;
kustomize)
	cat "$2/all.yaml"
	exit $?
	;;
--kubeconfig)
	cp "$2" "$call/kubeconfig"
	cat > "$call/stdin"
	if [ -n "$FAKE_KUBECTL_SLEEP" ]; then
		sleep "$FAKE_KUBECTL_SLEEP"
	fi
	if [ -n "$FAKE_KUBECTL_FAIL_ON" ] && grep -q -- "$FAKE_KUBECTL_FAIL_ON" "$call/kubeconfig"; then
		exit 5
	fi
	;;
esac
exit "${FAKE_KUBECTL_EXIT:-0}"
"#;

/// One recorded kubectl invocation.
#[derive(Debug)]
pub struct Call {
	pub args: Vec<String>,
	pub stdin: Option<String>,
	pub kubeconfig: Option<String>,
}

impl Call {
	/// Path given with `--kubeconfig`.
	pub fn kubeconfig_path(&self) -> Option<&str> {
		match self.args.as_slice() {
			[flag, path, ..] if flag == "--kubeconfig" => Some(path.as_str()),
			_ => None,
		}
	}
}

pub struct FakeKubectl {
	dir: TempDir,
}

impl FakeKubectl {
	pub fn new() -> Self {
		let dir = TempDir::new().unwrap();
		let script = dir.path().join("kubectl");
		fs::write(&script, SCRIPT).unwrap();
		fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
		fs::create_dir(dir.path().join("log")).unwrap();
		fs::create_dir(dir.path().join("work")).unwrap();
		Self { dir }
	}

	/// Directory the router runs in; manifests can be placed here.
	pub fn workdir(&self) -> PathBuf {
		self.dir.path().join("work")
	}

	pub fn write(&self, name: &str, content: &str) -> PathBuf {
		let path = self.workdir().join(name);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).unwrap();
		}
		fs::write(&path, content).unwrap();
		path
	}

	pub fn command(&self) -> Command {
		let mut cmd = Command::new(env!("CARGO_BIN_EXE_kubectl-target"));
		cmd.arg("--kubectl")
			.arg(self.dir.path().join("kubectl"))
			.env("FAKE_KUBECTL_LOG", self.dir.path().join("log"))
			.env_remove("KUBECTL_TARGET_KUBECTL")
			.env_remove("FAKE_KUBECTL_EXIT")
			.env_remove("FAKE_KUBECTL_FAIL_ON")
			.env_remove("FAKE_KUBECTL_SLEEP")
			.env_remove("RUST_LOG")
			.current_dir(self.workdir());
		cmd
	}

	/// Run `kubectl-target --kubectl <fake> <args>` with `stdin`.
	pub fn run(&self, args: &[&str], stdin: &str) -> Output {
		let mut child = self
			.command()
			.args(args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.unwrap();
		// the router may exit without reading its input
		let _ = child.stdin.take().unwrap().write_all(stdin.as_bytes());
		child.wait_with_output().unwrap()
	}

	pub fn calls(&self) -> Vec<Call> {
		let mut dirs: Vec<PathBuf> = fs::read_dir(self.dir.path().join("log"))
			.unwrap()
			.map(|e| e.unwrap().path())
			.collect();
		dirs.sort();
		dirs.iter().map(|dir| read_call(dir)).collect()
	}
}

fn read_call(dir: &Path) -> Call {
	// a call still starting up has no args yet
	let args = fs::read_to_string(dir.join("args")).unwrap_or_default();
	Call {
		args: args.lines().map(str::to_string).collect(),
		stdin: fs::read_to_string(dir.join("stdin")).ok(),
		kubeconfig: fs::read_to_string(dir.join("kubeconfig")).ok(),
	}
}

/// A ConfigMap manifest carrying the given annotations.
pub fn config_map(name: &str, annotations: &[(&str, &str)]) -> String {
	let mut manifest = format!("---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n");
	if !annotations.is_empty() {
		manifest.push_str("  annotations:\n");
		for (key, value) in annotations {
			manifest.push_str(&format!("    {key}: {value:?}\n"));
		}
	}
	manifest
}

pub fn stderr(output: &Output) -> String {
	String::from_utf8_lossy(&output.stderr).into_owned()
}
