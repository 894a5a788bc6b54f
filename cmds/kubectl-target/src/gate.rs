//! Decides whether a forwarded invocation can be partitioned by target.

use std::fmt;

use crate::args::{ArgsError, FlagRole, ParsedArgs};

/// The only subcommand the router intercepts.
pub const APPLY_SUBCOMMAND: &str = "apply";

/// Why an invocation is passed to kubectl untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardReason {
	NotApply(Option<String>),
	Unparseable(ArgsError),
	Prune,
	/// Positional arguments, e.g. `apply view-last-applied`.
	Positional(String),
	NoInput,
	/// `-f` together with `-k`, which kubectl rejects.
	MixedInput,
}

impl fmt::Display for ForwardReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ForwardReason::NotApply(Some(sub)) => write!(f, "subcommand {sub:?} is not intercepted"),
			ForwardReason::NotApply(None) => write!(f, "no subcommand given"),
			ForwardReason::Unparseable(e) => write!(f, "arguments not understood: {e}"),
			ForwardReason::Prune => write!(f, "--prune is not supported"),
			ForwardReason::Positional(arg) => write!(f, "unexpected argument {arg:?}"),
			ForwardReason::NoInput => write!(f, "no -f or -k input given"),
			ForwardReason::MixedInput => write!(f, "-f and -k given together"),
		}
	}
}

/// An apply invocation the router will partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyInvocation {
	pub args: ParsedArgs,
	pub filenames: Vec<String>,
	pub kustomize: Option<String>,
	pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
	Forward(ForwardReason),
	Intercept(ApplyInvocation),
}

/// Inspect the forwarded argument list. Never fails: anything the router
/// cannot handle safely is forwarded whole.
pub fn decide(forwarded: &[String]) -> Decision {
	match forwarded.first() {
		Some(sub) if sub == APPLY_SUBCOMMAND => {}
		other => return Decision::Forward(ForwardReason::NotApply(other.cloned())),
	}

	let args = match ParsedArgs::parse(forwarded) {
		Ok(args) => args,
		Err(e) => return Decision::Forward(ForwardReason::Unparseable(e)),
	};

	if args.is_enabled(FlagRole::Prune) {
		return Decision::Forward(ForwardReason::Prune);
	}

	if let Some(arg) = args.positionals().next() {
		return Decision::Forward(ForwardReason::Positional(arg.to_string()));
	}

	let filenames: Vec<String> = args
		.values(FlagRole::Filename)
		.into_iter()
		.map(str::to_string)
		.collect();
	// kubectl keeps only the last -k
	let kustomize = args.values(FlagRole::Kustomize).last().map(|s| s.to_string());

	match (filenames.is_empty(), &kustomize) {
		(true, None) => return Decision::Forward(ForwardReason::NoInput),
		(false, Some(_)) => return Decision::Forward(ForwardReason::MixedInput),
		_ => {}
	}

	let recursive = args.is_enabled(FlagRole::Recursive);
	Decision::Intercept(ApplyInvocation {
		args,
		filenames,
		kustomize,
		recursive,
	})
}
