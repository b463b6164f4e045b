//! The runtime hosting the agent.
//!
//! The host owns the lifecycle state machine and the user-facing surfaces
//! (notifications, windows). The agent only sends it signals.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use url::Url;

use crate::agent::Notification;

#[async_trait]
pub trait Host: Send + Sync {
  /// Become eligible for activation without waiting for old pages to close.
  fn skip_waiting(&self);

  /// Take control of all open pages in scope immediately.
  fn claim_clients(&self);

  async fn show_notification(&self, notification: &Notification) -> Result<()>;

  fn close_notification(&self, notification: &Notification);

  async fn open_window(&self, url: &Url) -> Result<()>;
}

/// Host for command-line runs: signals are recorded and logged, and
/// notifications and windows are written to stdout.
#[derive(Debug, Default)]
pub struct LocalHost {
  skip_waiting: AtomicBool,
  claimed: AtomicBool,
}

impl LocalHost {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub fn skipped_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  #[cfg(test)]
  pub fn claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Host for LocalHost {
  fn skip_waiting(&self) {
    if !self.skip_waiting.swap(true, Ordering::SeqCst) {
      info!("Skip waiting requested");
    }
  }

  fn claim_clients(&self) {
    self.claimed.store(true, Ordering::SeqCst);
    info!("Claiming clients");
  }

  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    let json = serde_json::to_string_pretty(notification)
      .map_err(|e| eyre!("Failed to serialize notification: {}", e))?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", json).map_err(|e| eyre!("Failed to show notification: {}", e))?;
    Ok(())
  }

  fn close_notification(&self, notification: &Notification) {
    debug!(title = %notification.title, "Notification closed");
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    info!(%url, "Opening window");
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", url).map_err(|e| eyre!("Failed to open window: {}", e))?;
    Ok(())
  }
}
