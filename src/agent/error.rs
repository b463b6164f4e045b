use thiserror::Error;

/// Failures the agent can encounter while handling an event.
///
/// Each kind has its own propagation policy: seed failures are absorbed by
/// install, network failures become the fetch result (or the navigation
/// fallback), and cache write failures never reach the response path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
  #[error("Failed to cache seed asset {url}: {reason}")]
  SeedInstall { url: String, reason: String },

  #[error("Network request for {url} failed: {reason}")]
  Network { url: String, reason: String },

  #[error("Failed to write {url} to cache: {reason}")]
  CacheWrite { url: String, reason: String },
}

impl AgentError {
  pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
    Self::Network {
      url: url.into(),
      reason: reason.to_string(),
    }
  }

  pub fn cache_write(url: impl Into<String>, reason: impl ToString) -> Self {
    Self::CacheWrite {
      url: url.into(),
      reason: reason.to_string(),
    }
  }

  pub fn seed_install(url: impl Into<String>, reason: impl ToString) -> Self {
    Self::SeedInstall {
      url: url.into(),
      reason: reason.to_string(),
    }
  }
}
