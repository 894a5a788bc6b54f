//! External command execution.
//!
//! Every child process the router starts (the forwarded kubectl call, the
//! credential plugins, `kubectl kustomize`, the per-group applies) goes through
//! [`CommandRunner`], so routing and dispatch can be exercised against an
//! in-memory runner in tests.

use std::{
	io::{self, Write},
	process::{Command, ExitStatus, Stdio},
	thread,
};

use thiserror::Error;
use tracing::instrument;

/// Errors that prevent a child from running to completion.
///
/// A child that ran and exited non-zero is not an error here; its code is
/// reported through [`Completed::code`].
#[derive(Debug, Error)]
pub enum RunnerError {
	#[error("failed to start {program}")]
	Spawn {
		program: String,
		#[source]
		source: io::Error,
	},

	#[error("failed to write stdin of {program}")]
	Stdin {
		program: String,
		#[source]
		source: io::Error,
	},

	#[error("failed to wait for {program}")]
	Wait {
		program: String,
		#[source]
		source: io::Error,
	},
}

/// A command to run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invocation {
	pub program: String,
	pub args: Vec<String>,
	/// Extra environment variables on top of the inherited environment.
	pub env: Vec<(String, String)>,
	/// Bytes fed to the child's stdin, which is closed afterwards.
	/// When `None` the child inherits stdin.
	pub stdin: Option<Vec<u8>>,
	/// Buffer stdout instead of streaming it to the parent.
	pub capture_stdout: bool,
}

impl Invocation {
	pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			program: program.into(),
			args: args.into_iter().map(Into::into).collect(),
			..Self::default()
		}
	}

	#[must_use]
	pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
		self.stdin = Some(bytes.into());
		self
	}

	#[must_use]
	pub fn capture_stdout(mut self) -> Self {
		self.capture_stdout = true;
		self
	}

	#[must_use]
	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}
}

/// Result of a child that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completed {
	pub code: i32,
	/// Captured stdout; empty unless [`Invocation::capture_stdout`] was set.
	pub stdout: Vec<u8>,
}

impl Completed {
	pub fn success(&self) -> bool {
		self.code == 0
	}
}

/// Capability to run external commands, blocking until they exit.
pub trait CommandRunner {
	fn run(&self, invocation: &Invocation) -> Result<Completed, RunnerError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
	fn run(&self, invocation: &Invocation) -> Result<Completed, RunnerError> {
		(**self).run(invocation)
	}
}

/// Runs commands as real child processes.
///
/// stderr is always inherited so diagnostics from kubectl and the credential
/// plugins reach the operator live.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
	#[instrument(skip_all, fields(program = %invocation.program))]
	fn run(&self, invocation: &Invocation) -> Result<Completed, RunnerError> {
		let program = &invocation.program;
		tracing::debug!(args = ?invocation.args, "running command");

		let mut cmd = Command::new(program);
		cmd.args(&invocation.args);
		cmd.envs(invocation.env.iter().map(|(k, v)| (k, v)));
		cmd.stderr(Stdio::inherit());
		cmd.stdin(if invocation.stdin.is_some() {
			Stdio::piped()
		} else {
			Stdio::inherit()
		});
		cmd.stdout(if invocation.capture_stdout {
			Stdio::piped()
		} else {
			Stdio::inherit()
		});

		let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
			program: program.clone(),
			source,
		})?;

		let stdin = child.stdin.take();
		// Feed stdin from a helper thread while the main thread drains stdout,
		// so neither pipe can fill up and stall the child.
		let output = thread::scope(|scope| {
			let writer = stdin.map(|mut pipe| {
				let bytes = invocation.stdin.as_deref().unwrap_or_default();
				scope.spawn(move || {
					let result = pipe.write_all(bytes);
					// Closing the pipe signals EOF to the child.
					drop(pipe);
					result
				})
			});

			let output = child.wait_with_output();

			if let Some(writer) = writer {
				match writer.join() {
					Ok(Ok(())) => {}
					// The child may exit without reading all of its input.
					Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
					Ok(Err(source)) => {
						return Err(RunnerError::Stdin {
							program: program.clone(),
							source,
						})
					}
					Err(payload) => std::panic::resume_unwind(payload),
				}
			}

			output.map_err(|source| RunnerError::Wait {
				program: program.clone(),
				source,
			})
		})?;

		let code = exit_code(output.status);
		tracing::debug!(code, "command finished");
		Ok(Completed {
			code,
			stdout: output.stdout,
		})
	}
}

/// Exit code of a finished child, using the shell convention `128 + signal`
/// for children killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
	if let Some(code) = status.code() {
		return code;
	}
	#[cfg(unix)]
	{
		use std::os::unix::process::ExitStatusExt;
		if let Some(signal) = status.signal() {
			return 128 + signal;
		}
	}
	1
}

#[cfg(all(test, unix))]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	fn sh(script: &str) -> Invocation {
		Invocation::new("sh", ["-c", script])
	}

	#[test]
	fn test_run_success() {
		let completed = ProcessRunner.run(&sh("exit 0")).unwrap();
		assert!(completed.success());
		assert!(completed.stdout.is_empty());
	}

	#[test]
	fn test_run_propagates_exit_code() {
		let completed = ProcessRunner.run(&sh("exit 42")).unwrap();
		assert_eq!(completed.code, 42);
	}

	#[test]
	fn test_run_captures_stdout() {
		let completed = ProcessRunner
			.run(&sh("printf 'kind: Config'").capture_stdout())
			.unwrap();
		assert_eq!(completed.stdout, b"kind: Config");
	}

	#[test]
	fn test_run_feeds_stdin() {
		let completed = ProcessRunner
			.run(&sh("cat").stdin("---\nkind: ConfigMap\n").capture_stdout())
			.unwrap();
		assert_eq!(completed.stdout, b"---\nkind: ConfigMap\n");
	}

	#[test]
	fn test_run_child_ignoring_stdin() {
		let big = vec![b'x'; 1 << 20];
		let completed = ProcessRunner.run(&sh("exit 3").stdin(big)).unwrap();
		assert_eq!(completed.code, 3);
	}

	#[test]
	fn test_run_sets_env() {
		let completed = ProcessRunner
			.run(
				&sh("printf '%s' \"$KUBECONFIG\"")
					.env("KUBECONFIG", "/tmp/config")
					.capture_stdout(),
			)
			.unwrap();
		assert_eq!(completed.stdout, b"/tmp/config");
	}

	#[test]
	fn test_run_signal_exit_code() {
		let completed = ProcessRunner.run(&sh("kill -9 $$")).unwrap();
		assert_eq!(completed.code, 128 + 9);
	}

	#[test]
	fn test_run_missing_binary() {
		let err = ProcessRunner
			.run(&Invocation::new(
				"kubectl-target-definitely-missing",
				Vec::<String>::new(),
			))
			.unwrap_err();
		assert_matches!(err, RunnerError::Spawn { program, .. } if program == "kubectl-target-definitely-missing");
	}
}
