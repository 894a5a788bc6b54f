//! Parsing of forwarded `kubectl apply` argument lists.
//!
//! kubectl uses pflag conventions, which clap does not model (optional-value
//! flags, `-fvalue`, shorthand clusters), so the forwarded arguments are parsed
//! against a static flag table instead. Every parsed flag keeps the tokens it
//! came from, which lets the dispatcher drop input flags while re-emitting
//! everything else as written.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
	#[error("no subcommand given")]
	MissingSubcommand,

	#[error("unknown flag: --{0}")]
	UnknownFlag(String),

	#[error("unknown shorthand flag: '{shorthand}' in {token}")]
	UnknownShorthand { shorthand: char, token: String },

	#[error("flag needs an argument: {0}")]
	MissingValue(String),

	#[error("invalid argument {value:?} for boolean flag {flag}")]
	InvalidBool { flag: String, value: String },
}

/// How a flag consumes values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
	/// `--flag` or `--flag=false`.
	Bool,
	/// `--flag value` or `--flag=value`.
	Value,
	/// Takes a value only in `--flag=value` form; bare `--flag` uses a default.
	OptionalValue,
}

/// What the router cares about for a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagRole {
	Filename,
	Kustomize,
	Recursive,
	Kubeconfig,
	Prune,
	Passthrough,
}

impl FlagRole {
	/// Flags selecting where manifests are read from.
	pub fn is_input(self) -> bool {
		matches!(self, Self::Filename | Self::Kustomize | Self::Recursive)
	}
}

#[derive(Debug, PartialEq, Eq)]
pub struct FlagSpec {
	pub long: &'static str,
	pub short: Option<char>,
	pub kind: FlagKind,
	pub role: FlagRole,
}

const fn flag(long: &'static str, kind: FlagKind) -> FlagSpec {
	FlagSpec {
		long,
		short: None,
		kind,
		role: FlagRole::Passthrough,
	}
}

impl FlagSpec {
	const fn short(mut self, short: char) -> Self {
		self.short = Some(short);
		self
	}

	const fn role(mut self, role: FlagRole) -> Self {
		self.role = role;
		self
	}
}

use FlagKind::{Bool, OptionalValue, Value};

/// Flags accepted by `kubectl apply`, including kubectl's global flags.
pub static APPLY_FLAGS: &[FlagSpec] = &[
	// apply
	flag("all", Bool),
	flag("allow-missing-template-keys", Bool),
	flag("applyset", Value),
	flag("cascade", OptionalValue),
	flag("dry-run", OptionalValue),
	flag("field-manager", Value),
	flag("filename", Value).short('f').role(FlagRole::Filename),
	flag("force", Bool),
	flag("force-conflicts", Bool),
	flag("grace-period", Value),
	flag("kustomize", Value).short('k').role(FlagRole::Kustomize),
	flag("openapi-patch", Bool),
	flag("output", Value).short('o'),
	flag("overwrite", Bool),
	flag("prune", Bool).role(FlagRole::Prune),
	flag("prune-allowlist", Value),
	flag("prune-whitelist", Value),
	flag("recursive", Bool).short('R').role(FlagRole::Recursive),
	flag("selector", Value).short('l'),
	flag("server-side", Bool),
	flag("show-managed-fields", Bool),
	flag("template", Value),
	flag("timeout", Value),
	flag("validate", OptionalValue),
	flag("wait", Bool),
	// global
	flag("as", Value),
	flag("as-group", Value),
	flag("as-uid", Value),
	flag("cache-dir", Value),
	flag("certificate-authority", Value),
	flag("client-certificate", Value),
	flag("client-key", Value),
	flag("cluster", Value),
	flag("context", Value),
	flag("disable-compression", Bool),
	flag("insecure-skip-tls-verify", Bool),
	flag("kubeconfig", Value).role(FlagRole::Kubeconfig),
	flag("log-flush-frequency", Value),
	flag("match-server-version", Bool),
	flag("namespace", Value).short('n'),
	flag("password", Value),
	flag("profile", Value),
	flag("profile-output", Value),
	flag("request-timeout", Value),
	flag("server", Value).short('s'),
	flag("tls-server-name", Value),
	flag("token", Value),
	flag("user", Value),
	flag("username", Value),
	flag("v", Value).short('v'),
	flag("vmodule", Value),
	flag("warnings-as-errors", Bool),
];

fn lookup_long(name: &str) -> Option<&'static FlagSpec> {
	APPLY_FLAGS.iter().find(|f| f.long == name)
}

fn lookup_short(short: char) -> Option<&'static FlagSpec> {
	APPLY_FLAGS.iter().find(|f| f.short == Some(short))
}

/// Boolean literals accepted by pflag (Go's `strconv.ParseBool`).
fn parse_bool(value: &str) -> Option<bool> {
	match value {
		"1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
		"0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
		_ => None,
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFlag {
	pub spec: &'static FlagSpec,
	/// Explicit value, if one was given.
	pub value: Option<String>,
	tokens: Vec<String>,
}

impl ParsedFlag {
	/// Whether a boolean flag is switched on.
	pub fn is_true(&self) -> bool {
		self.spec.kind == Bool && self.value.as_deref().map_or(true, |v| parse_bool(v) == Some(true))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
	Flag(ParsedFlag),
	Positional(String),
	/// The `--` end-of-flags marker.
	Terminator,
}

/// A forwarded argument list split into subcommand and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
	pub subcommand: String,
	pub args: Vec<Arg>,
}

impl ParsedArgs {
	/// Parse an argument list whose first element is the kubectl subcommand.
	pub fn parse(forwarded: &[String]) -> Result<Self, ArgsError> {
		let (subcommand, rest) = forwarded.split_first().ok_or(ArgsError::MissingSubcommand)?;

		let mut args = Vec::new();
		let mut tokens = rest.iter();
		while let Some(token) = tokens.next() {
			if token == "--" {
				args.push(Arg::Terminator);
				args.extend(tokens.by_ref().cloned().map(Arg::Positional));
				break;
			}

			if let Some(long) = token.strip_prefix("--") {
				args.push(Arg::Flag(parse_long(token, long, &mut tokens)?));
			} else if token.len() > 1 && token.starts_with('-') {
				for parsed in parse_shorthand(token, &mut tokens)? {
					args.push(Arg::Flag(parsed));
				}
			} else {
				args.push(Arg::Positional(token.clone()));
			}
		}

		Ok(Self {
			subcommand: subcommand.clone(),
			args,
		})
	}

	pub fn flags(&self) -> impl Iterator<Item = &ParsedFlag> {
		self.args.iter().filter_map(|a| match a {
			Arg::Flag(f) => Some(f),
			_ => None,
		})
	}

	pub fn positionals(&self) -> impl Iterator<Item = &str> {
		self.args.iter().filter_map(|a| match a {
			Arg::Positional(p) => Some(p.as_str()),
			_ => None,
		})
	}

	/// Values of all flags with the given role, in order.
	pub fn values(&self, role: FlagRole) -> Vec<&str> {
		self.flags()
			.filter(|f| f.spec.role == role)
			.filter_map(|f| f.value.as_deref())
			.collect()
	}

	/// Whether a boolean flag with the given role is on. The last occurrence wins.
	pub fn is_enabled(&self, role: FlagRole) -> bool {
		self.flags()
			.filter(|f| f.spec.role == role)
			.last()
			.is_some_and(ParsedFlag::is_true)
	}

	/// Rebuild the argument list, leaving out flags for which `drop` returns true.
	pub fn to_args_without(&self, drop: impl Fn(FlagRole) -> bool) -> Vec<String> {
		self.to_args_with(drop, &[])
	}

	/// Like [`Self::to_args_without`], with `extra` flag tokens added after
	/// the last flag, before any `--`.
	pub fn to_args_with(&self, drop: impl Fn(FlagRole) -> bool, extra: &[&str]) -> Vec<String> {
		let mut out = vec![self.subcommand.clone()];
		let mut pending = Some(extra);
		for arg in &self.args {
			match arg {
				Arg::Flag(f) if drop(f.spec.role) => {}
				Arg::Flag(f) => out.extend(f.tokens.iter().cloned()),
				Arg::Positional(p) => out.push(p.clone()),
				Arg::Terminator => {
					out.extend(pending.take().into_iter().flatten().map(|t| t.to_string()));
					out.push("--".to_string());
				}
			}
		}
		out.extend(pending.into_iter().flatten().map(|t| t.to_string()));
		out
	}
}

impl fmt::Display for ParsedArgs {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_args_without(|_| false).join(" "))
	}
}

fn check_bool(name: &str, value: Option<&str>) -> Result<(), ArgsError> {
	match value {
		Some(v) if parse_bool(v).is_none() => Err(ArgsError::InvalidBool {
			flag: name.to_string(),
			value: v.to_string(),
		}),
		_ => Ok(()),
	}
}

fn parse_long<'a>(
	token: &str,
	long: &str,
	rest: &mut impl Iterator<Item = &'a String>,
) -> Result<ParsedFlag, ArgsError> {
	let (name, inline) = match long.split_once('=') {
		Some((name, value)) => (name, Some(value.to_string())),
		None => (long, None),
	};
	let spec = lookup_long(name).ok_or_else(|| ArgsError::UnknownFlag(name.to_string()))?;

	let mut tokens = vec![token.to_string()];
	let value = match spec.kind {
		Bool => {
			check_bool(&format!("--{name}"), inline.as_deref())?;
			inline
		}
		OptionalValue => inline,
		Value => match inline {
			Some(v) => Some(v),
			None => {
				let v = rest
					.next()
					.ok_or_else(|| ArgsError::MissingValue(token.to_string()))?
					.clone();
				tokens.push(v.clone());
				Some(v)
			}
		},
	};

	Ok(ParsedFlag {
		spec,
		value,
		tokens,
	})
}

/// Parse a shorthand token such as `-f`, `-fvalue`, `-f=value` or `-Rf`.
///
/// Flags from a cluster are re-emitted one by one (`-R -f value`).
fn parse_shorthand<'a>(
	token: &str,
	rest: &mut impl Iterator<Item = &'a String>,
) -> Result<Vec<ParsedFlag>, ArgsError> {
	let mut parsed = Vec::new();
	for (idx, short) in token[1..].char_indices() {
		let spec = lookup_short(short).ok_or_else(|| ArgsError::UnknownShorthand {
			shorthand: short,
			token: token.to_string(),
		})?;
		let flag_token = format!("-{short}");
		let remainder = &token[1 + idx + short.len_utf8()..];

		match spec.kind {
			Value => {
				let value = match remainder.strip_prefix('=').unwrap_or(remainder) {
					"" if !remainder.starts_with('=') => rest
						.next()
						.ok_or_else(|| ArgsError::MissingValue(flag_token.clone()))?
						.clone(),
					inline => inline.to_string(),
				};
				parsed.push(ParsedFlag {
					spec,
					tokens: vec![flag_token, value.clone()],
					value: Some(value),
				});
				break;
			}
			Bool | OptionalValue => {
				if let Some(inline) = remainder.strip_prefix('=') {
					if spec.kind == Bool {
						check_bool(&flag_token, Some(inline))?;
					}
					parsed.push(ParsedFlag {
						spec,
						tokens: vec![format!("{flag_token}={inline}")],
						value: Some(inline.to_string()),
					});
					break;
				}
				parsed.push(ParsedFlag {
					spec,
					tokens: vec![flag_token],
					value: None,
				});
			}
		}
	}

	Ok(parsed)
}
