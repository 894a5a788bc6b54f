//! Removing credential files when the router is interrupted.
//!
//! Paths of live credential files are kept in a process-wide registry. After
//! [`install`], a listener thread waits for SIGINT or SIGTERM, removes every
//! registered file and exits with `128 + signal`. Children share the
//! terminal's process group, so an interactive Ctrl-C reaches kubectl too.

use std::{
	fs, io,
	path::{Path, PathBuf},
	sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::Result;

static LIVE: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

fn live() -> MutexGuard<'static, Vec<PathBuf>> {
	LIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of one file, released on drop.
#[derive(Debug)]
pub struct Tracked {
	path: PathBuf,
}

impl Drop for Tracked {
	fn drop(&mut self) {
		let mut live = live();
		if let Some(idx) = live.iter().position(|p| *p == self.path) {
			live.swap_remove(idx);
		}
	}
}

/// Create a file and register the path `path_of` reports for it.
///
/// Creation runs under the registry lock, so the listener never misses a
/// file that already exists.
pub fn track<T>(create: impl FnOnce() -> io::Result<T>, path_of: impl FnOnce(&T) -> &Path) -> io::Result<(T, Tracked)> {
	let mut live = live();
	let value = create()?;
	let path = path_of(&value).to_path_buf();
	live.push(path.clone());
	Ok((value, Tracked { path }))
}

fn remove_tracked(live: &[PathBuf]) {
	for path in live {
		match fs::remove_file(path) {
			Ok(()) => tracing::debug!(path = %path.display(), "removed credential file"),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => tracing::warn!(path = %path.display(), "failed to remove credential file: {e}"),
		}
	}
}

/// Start the listener thread. Handlers are registered before this returns.
#[cfg(unix)]
pub fn install() -> Result<()> {
	use anyhow::Context;
	use tokio::signal::unix::{signal, SignalKind};

	const SIGINT: i32 = 2;
	const SIGTERM: i32 = 15;

	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.context("failed to start signal runtime")?;
	let (mut sigint, mut sigterm) = {
		let _guard = runtime.enter();
		(
			signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?,
			signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?,
		)
	};

	std::thread::Builder::new()
		.name("signals".to_string())
		.spawn(move || {
			let signo = runtime.block_on(async {
				tokio::select! {
					_ = sigint.recv() => SIGINT,
					_ = sigterm.recv() => SIGTERM,
				}
			});
			tracing::info!(signal = signo, "interrupted, removing credential files");
			// held until exit so no new file appears
			let live = live();
			remove_tracked(&live);
			std::process::exit(128 + signo);
		})
		.context("failed to start signal listener")?;
	Ok(())
}

/// Signals are not handled on this platform.
#[cfg(not(unix))]
pub fn install() -> Result<()> {
	Ok(())
}
