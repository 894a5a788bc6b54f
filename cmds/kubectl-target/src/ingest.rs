//! Manifest ingestion.
//!
//! Turns the `-f`/`-k` inputs of an apply invocation into a lazy sequence of
//! [`Resource`]s in source order. Files are only opened when the sequence
//! reaches them.

use std::{
	collections::VecDeque,
	fs, io,
	io::Read,
	path::{Path, PathBuf},
};

use serde_json::Value;
use thiserror::Error;
use tracing::{instrument, warn};
use walkdir::WalkDir;

use crate::{
	gate::ApplyInvocation,
	resource::{Origin, Resource, ResourceError},
	runner::{CommandRunner, Invocation, RunnerError},
	yaml::{self, DecodeError},
};

/// File extensions picked up when a directory is given as input.
const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(Debug, Error)]
pub enum IngestError {
	#[error("remote manifest {0} is not supported")]
	Remote(String),

	#[error("reading {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("walking directory {}", path.display())]
	Walk {
		path: PathBuf,
		#[source]
		source: walkdir::Error,
	},

	#[error("reading stdin")]
	Stdin(#[source] io::Error),

	#[error("stdin (-) given more than once")]
	StdinTwice,

	#[error("{what} is not valid UTF-8")]
	NotUtf8 { what: String },

	#[error("running kustomize for {dir}")]
	Kustomize {
		dir: String,
		#[source]
		source: RunnerError,
	},

	#[error("kustomize build of {dir} exited with code {code}")]
	KustomizeFailed { dir: String, code: i32 },

	#[error("decoding {origin}")]
	Decode {
		origin: Origin,
		#[source]
		source: DecodeError,
	},

	#[error("invalid manifest in {origin}")]
	Invalid {
		origin: Origin,
		#[source]
		source: ResourceError,
	},
}

impl IngestError {
	/// Errors confined to a single document, which best-effort ingestion may skip.
	pub fn is_malformed_entry(&self) -> bool {
		matches!(self, Self::Decode { .. } | Self::Invalid { .. })
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
	Stdin,
	Path(PathBuf),
	Kustomize(String),
}

fn is_url(name: &str) -> bool {
	name.starts_with("http://") || name.starts_with("https://")
}

/// Lazily reads the inputs of one apply invocation.
///
/// The sequence can be consumed once; stdin in particular is read at most once.
/// A hard failure (unreadable file, failed kustomize build) ends the sequence
/// after it is yielded.
pub struct Ingestor<'a, R> {
	runner: &'a R,
	kubectl: &'a str,
	recursive: bool,
	stdin: Option<Box<dyn Read + 'a>>,
	sources: VecDeque<Source>,
	files: VecDeque<PathBuf>,
	pending: VecDeque<Result<Resource, IngestError>>,
	done: bool,
}

impl<'a, R: CommandRunner> Ingestor<'a, R> {
	pub fn new(
		runner: &'a R,
		kubectl: &'a str,
		invocation: &ApplyInvocation,
		stdin: Box<dyn Read + 'a>,
	) -> Self {
		let mut sources: VecDeque<Source> = invocation
			.filenames
			.iter()
			.map(|name| match name.as_str() {
				"-" => Source::Stdin,
				path => Source::Path(PathBuf::from(path)),
			})
			.collect();
		sources.extend(invocation.kustomize.iter().cloned().map(Source::Kustomize));

		Self {
			runner,
			kubectl,
			recursive: invocation.recursive,
			stdin: Some(stdin),
			sources,
			files: VecDeque::new(),
			pending: VecDeque::new(),
			done: false,
		}
	}

	/// Drain the sequence into a list.
	///
	/// With `continue_on_error`, documents that fail to decode or are not
	/// valid manifests are logged and skipped; any other error aborts.
	pub fn collect_resources(self, continue_on_error: bool) -> Result<Vec<Resource>, IngestError> {
		let mut resources = Vec::new();
		let mut skipped = 0usize;
		for item in self {
			match item {
				Ok(resource) => resources.push(resource),
				Err(e) if continue_on_error && e.is_malformed_entry() => {
					let e = anyhow::Error::new(e);
					warn!("skipping malformed manifest: {e:#}");
					skipped += 1;
				}
				Err(e) => return Err(e),
			}
		}
		if skipped > 0 {
			warn!(skipped, "some manifests were skipped");
		}
		tracing::debug!(count = resources.len(), "ingested resources");
		Ok(resources)
	}

	fn open(&mut self, source: Source) -> Result<(), IngestError> {
		match source {
			Source::Stdin => {
				let mut stdin = self.stdin.take().ok_or(IngestError::StdinTwice)?;
				let mut buf = String::new();
				stdin.read_to_string(&mut buf).map_err(IngestError::Stdin)?;
				self.push_stream(&buf, |document| Origin::Stdin { document });
			}
			Source::Path(path) => {
				if path.to_str().is_some_and(is_url) {
					return Err(IngestError::Remote(path.display().to_string()));
				}
				let metadata = fs::metadata(&path).map_err(|source| IngestError::Read {
					path: path.clone(),
					source,
				})?;
				if metadata.is_dir() {
					let files = self.expand_dir(&path)?;
					self.files.extend(files);
				} else {
					self.files.push_back(path);
				}
			}
			Source::Kustomize(dir) => {
				let stream = self.kustomize(&dir)?;
				self.push_stream(&stream, |document| Origin::Kustomize {
					dir: dir.clone(),
					document,
				});
			}
		}
		Ok(())
	}

	fn expand_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
		let max_depth = if self.recursive { usize::MAX } else { 1 };
		let mut files = Vec::new();
		for entry in WalkDir::new(dir)
			.min_depth(1)
			.max_depth(max_depth)
			.sort_by_file_name()
		{
			let entry = entry.map_err(|source| IngestError::Walk {
				path: dir.to_path_buf(),
				source,
			})?;
			if !entry.file_type().is_file() {
				continue;
			}
			let is_manifest = entry
				.path()
				.extension()
				.and_then(|e| e.to_str())
				.is_some_and(|e| MANIFEST_EXTENSIONS.contains(&e));
			if is_manifest {
				files.push(entry.into_path());
			}
		}
		Ok(files)
	}

	#[instrument(skip(self))]
	fn kustomize(&self, dir: &str) -> Result<String, IngestError> {
		let completed = self
			.runner
			.run(&Invocation::new(self.kubectl, ["kustomize", dir]).capture_stdout())
			.map_err(|source| IngestError::Kustomize {
				dir: dir.to_string(),
				source,
			})?;
		if !completed.success() {
			return Err(IngestError::KustomizeFailed {
				dir: dir.to_string(),
				code: completed.code,
			});
		}
		String::from_utf8(completed.stdout).map_err(|_| IngestError::NotUtf8 {
			what: format!("kustomize output for {dir}"),
		})
	}

	fn load_file(&mut self, path: PathBuf) -> Result<(), IngestError> {
		let content = fs::read(&path).map_err(|source| IngestError::Read {
			path: path.clone(),
			source,
		})?;
		let content = String::from_utf8(content).map_err(|_| IngestError::NotUtf8 {
			what: path.display().to_string(),
		})?;
		self.push_stream(&content, |document| Origin::File {
			path: path.clone(),
			document,
		});
		Ok(())
	}

	fn push_stream(&mut self, stream: &str, origin: impl Fn(usize) -> Origin) {
		for (index, document) in yaml::decode_documents(stream) {
			let origin = origin(index);
			match document {
				Ok(value) => push_value(&mut self.pending, value, &origin),
				Err(source) => self.pending.push_back(Err(IngestError::Decode { origin, source })),
			}
		}
	}
}

/// Queue a decoded document, flattening `kind: List` into its items.
fn push_value(out: &mut VecDeque<Result<Resource, IngestError>>, value: Value, origin: &Origin) {
	if value.get("kind").and_then(Value::as_str) == Some("List") {
		if let Some(Value::Array(items)) = value.get("items") {
			for item in items {
				push_value(out, item.clone(), origin);
			}
			return;
		}
	}
	out.push_back(
		Resource::from_value(value, origin.clone()).map_err(|source| IngestError::Invalid {
			origin: origin.clone(),
			source,
		}),
	);
}

impl<R: CommandRunner> Iterator for Ingestor<'_, R> {
	type Item = Result<Resource, IngestError>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			if let Some(item) = self.pending.pop_front() {
				return Some(item);
			}
			if self.done {
				return None;
			}

			let step = if let Some(path) = self.files.pop_front() {
				self.load_file(path)
			} else if let Some(source) = self.sources.pop_front() {
				self.open(source)
			} else {
				self.done = true;
				continue;
			};

			if let Err(e) = step {
				self.done = true;
				self.pending.clear();
				return Some(Err(e));
			}
		}
	}
}
