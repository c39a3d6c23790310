use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Output goes to stderr, or is
/// appended to `log_file` when one is configured. `RUST_LOG` overrides the
/// default filter.
pub fn init(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(format!("folio_chat={level},tower_http=warn,warn")));

  let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

  match log_file {
    Some(path) => {
      let file = OpenOptions::new().create(true).append(true).open(path)?;
      builder
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install log subscriber: {err}"))?;
    }
    None => {
      builder
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install log subscriber: {err}"))?;
    }
  }
  Ok(())
}
