mod agent;
mod cache;
mod cli;
mod config;
mod event;
mod host;
mod net;
#[cfg(test)]
mod testing;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use agent::OfflineAgent;
use cache::{CacheSource, CacheStorage, MemoryStorage, SqliteStorage};
use cli::{Args, Command};
use config::AgentConfig;
use event::Dispatcher;
use host::LocalHost;
use net::HttpNetwork;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_file.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let agent_config = config.agent_config()?;

  let storage: Arc<dyn CacheStorage> = if args.memory {
    Arc::new(MemoryStorage::new())
  } else if let Some(path) = &config.cache_db {
    Arc::new(SqliteStorage::open_at(path)?)
  } else {
    Arc::new(SqliteStorage::open_default()?)
  };

  let Some(event) = args.command.to_event(&agent_config)? else {
    return list_caches(storage.as_ref(), &agent_config);
  };

  let network = HttpNetwork::new(&agent_config.scope)?;
  let agent = OfflineAgent::new(
    agent_config,
    storage,
    Arc::new(network),
    Arc::new(LocalHost::new()),
  );
  let dispatcher = Dispatcher::new(agent);

  info!(
    kind = ?event.kind(),
    generation = %dispatcher.agent().config().cache_name,
    "Dispatching event"
  );
  let outcome = dispatcher.dispatch(event).await;

  // Background cache writes are not observed by the caller
  for failure in dispatcher.agent().settle().await {
    debug!(error = %failure, "Background task failed");
  }

  for failure in &outcome.failures {
    warn!(error = %failure, "Event work failed");
  }

  match outcome.response {
    Some(Ok(result)) => {
      let response = result.data;
      if result.source == CacheSource::Offline {
        warn!(url = %response.url, "Network unavailable, served offline document");
      }
      info!(
        status = response.status,
        source = ?result.source,
        url = %response.url,
        "Responded"
      );
      let mut stdout = std::io::stdout().lock();
      stdout
        .write_all(&response.body)
        .and_then(|_| stdout.flush())
        .map_err(|e| eyre!("Failed to write response body: {}", e))?;
    }
    Some(Err(e)) => return Err(eyre!("Fetch failed: {}", e)),
    None if matches!(args.command, Command::Fetch { .. }) => {
      return Err(eyre!("No response was produced"));
    }
    None => {}
  }

  if !outcome.failures.is_empty() {
    return Err(eyre!("{} event task(s) failed", outcome.failures.len()));
  }

  Ok(())
}

/// Install the tracing subscriber. Logs go to stderr unless a file is given,
/// so stdout stays reserved for response bodies.
fn init_logging(log_file: Option<&Path>) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, guard) = match log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name))
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_target(false)
    .with_ansi(log_file.is_none())
    .compact()
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

/// Print every cache generation with its entries, marking the current one.
fn list_caches(storage: &dyn CacheStorage, config: &AgentConfig) -> Result<()> {
  let mut stdout = std::io::stdout().lock();
  let generations = storage.keys()?;
  if generations.is_empty() {
    writeln!(stdout, "No caches").map_err(|e| eyre!("Failed to write: {}", e))?;
    return Ok(());
  }

  for generation in generations {
    let entries = storage.entries(&generation)?;
    let marker = if generation == config.cache_name { "*" } else { " " };
    writeln!(stdout, "{} {} ({} entries)", marker, generation, entries.len())
      .map_err(|e| eyre!("Failed to write: {}", e))?;
    for key in entries {
      writeln!(stdout, "    {}", key).map_err(|e| eyre!("Failed to write: {}", e))?;
    }
  }
  Ok(())
}
