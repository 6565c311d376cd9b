use serde::Serialize;
use std::{error::Error, path::Path};

#[cfg(not(debug_assertions))]
use human_panic::setup_panic;
use tracing::subscriber::{DefaultGuard, SetGlobalDefaultError};

#[cfg(debug_assertions)]
extern crate better_panic;

// [NOTE] tracing
//
// Construction logs at `trace` (every node), `debug` (scopes, placement,
// propagation misses) and `info` (one line per emitted or evaluated graph).
// Functions worth following carry `#[instrument(skip_all, fields(..))]`.

pub fn install_logger() -> Result<(), SetGlobalDefaultError> {
  let subscriber = tracing_subscriber::fmt().compact();

  #[cfg(debug_assertions)]
  let subscriber = subscriber.with_max_level(tracing::Level::DEBUG);

  tracing::subscriber::set_global_default(subscriber.finish())
}

pub fn init_logging() -> Result<(), SetGlobalDefaultError> {
  // Human Panic. Only enabled when *not* debugging.
  #[cfg(not(debug_assertions))]
  {
    setup_panic!();
  }

  // Better Panic. Only enabled *when* debugging.
  #[cfg(debug_assertions)]
  {
    better_panic::Settings::debug()
      .most_recent_first(false)
      .lineno_suffix(true)
      .verbosity(better_panic::Verbosity::Full)
      .install();
  }

  install_logger()
}

/// Thread-local subscriber for tests, captured by the test harness. Logging
/// stays on while the guard lives.
pub fn init_logging_tests() -> DefaultGuard {
  let subscriber = tracing_subscriber::fmt()
    .compact()
    .with_max_level(tracing::Level::TRACE)
    .with_test_writer()
    .finish();
  tracing::subscriber::set_default(subscriber)
}

pub fn serialize_to_file<T: Serialize>(path: &Path, obj: &T) -> Result<(), Box<dyn Error>> {
  let buff = serde_json::to_string_pretty(obj)?;
  std::fs::write(path, buff).map_err(|e| format!("Error creating file {}: {}", path.display(), e))?;
  Ok(())
}
