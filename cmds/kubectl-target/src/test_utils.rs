//! Common test utilities.

use std::{cell::RefCell, ops::Deref};

use crate::runner::{CommandRunner, Completed, Invocation, RunnerError};

/// One invocation seen by [`FakeRunner`].
#[derive(Debug, Clone)]
pub struct Call {
	pub invocation: Invocation,
	/// Contents of the `--kubeconfig` file at the time of the call, since the
	/// dispatcher removes it right afterwards.
	pub kubeconfig: Option<String>,
	/// Permission bits of that file.
	pub kubeconfig_mode: Option<u32>,
}

impl Call {
	pub fn stdin_str(&self) -> Option<&str> {
		self.invocation
			.stdin
			.as_deref()
			.map(|s| std::str::from_utf8(s).expect("stdin is utf-8"))
	}

	/// Path passed with `--kubeconfig`, if any.
	pub fn kubeconfig_path(&self) -> Option<&str> {
		self.args
			.iter()
			.position(|a| a == "--kubeconfig")
			.and_then(|i| self.args.get(i + 1))
			.map(String::as_str)
	}
}

impl Deref for Call {
	type Target = Invocation;

	fn deref(&self) -> &Invocation {
		&self.invocation
	}
}

#[cfg(unix)]
fn file_mode(path: &str) -> Option<u32> {
	use std::os::unix::fs::PermissionsExt;
	std::fs::metadata(path).ok().map(|m| m.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(_path: &str) -> Option<u32> {
	None
}

type Matcher = Box<dyn Fn(&Invocation) -> bool>;

enum Response {
	Exit { code: i32, stdout: Vec<u8> },
	SpawnFailure,
}

/// An in-memory command runner.
///
/// Records every invocation and answers with the first matching canned
/// response; unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
	responses: Vec<(Matcher, Response)>,
	calls: RefCell<Vec<Call>>,
}

impl FakeRunner {
	/// Respond to invocations for which `matcher` returns true.
	pub fn respond_when(
		mut self,
		matcher: impl Fn(&Invocation) -> bool + 'static,
		code: i32,
		stdout: impl Into<Vec<u8>>,
	) -> Self {
		self.responses.push((
			Box::new(matcher),
			Response::Exit {
				code,
				stdout: stdout.into(),
			},
		));
		self
	}

	/// Respond to invocations containing the argument `token`.
	pub fn respond_to(self, token: &str, code: i32, stdout: impl Into<Vec<u8>>) -> Self {
		let token = token.to_string();
		self.respond_when(move |inv| inv.args.iter().any(|a| *a == token), code, stdout)
	}

	/// Make invocations containing `token` fail to start.
	pub fn fail_to_start(mut self, token: &str) -> Self {
		let token = token.to_string();
		self.responses.push((
			Box::new(move |inv: &Invocation| inv.args.iter().any(|a| *a == token)),
			Response::SpawnFailure,
		));
		self
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.borrow().clone()
	}
}

impl CommandRunner for FakeRunner {
	fn run(&self, invocation: &Invocation) -> Result<Completed, RunnerError> {
		let mut call = Call {
			invocation: invocation.clone(),
			kubeconfig: None,
			kubeconfig_mode: None,
		};
		if let Some(path) = call.kubeconfig_path().map(str::to_string) {
			call.kubeconfig = std::fs::read_to_string(&path).ok();
			call.kubeconfig_mode = file_mode(&path);
		}
		self.calls.borrow_mut().push(call);

		let response = self
			.responses
			.iter()
			.find(|(matcher, _)| matcher(invocation))
			.map(|(_, response)| response);

		match response {
			Some(Response::Exit { code, stdout }) => Ok(Completed {
				code: *code,
				stdout: if invocation.capture_stdout {
					stdout.clone()
				} else {
					Vec::new()
				},
			}),
			Some(Response::SpawnFailure) => Err(RunnerError::Spawn {
				program: invocation.program.clone(),
				source: std::io::Error::from(std::io::ErrorKind::NotFound),
			}),
			None => Ok(Completed::default()),
		}
	}
}
