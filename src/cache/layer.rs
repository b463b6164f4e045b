//! Cache layer bound to the agent's current generation.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::CacheStorage;
use super::traits::{CacheResult, CachedEntry};
use crate::agent::AgentError;
use crate::net::{Method, Request, RequestKey, Response};

/// Cache layer that scopes every storage operation to one generation.
///
/// Reads and writes go to the current generation only; other generations
/// are only ever listed and deleted.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  generation: String,
}

impl CacheLayer {
  /// Create a new cache layer over the given storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      generation: generation.into(),
    }
  }

  /// Name of the current generation.
  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Create the current generation if absent.
  pub fn open(&self) -> Result<()> {
    if !self.storage.has(&self.generation)? {
      info!(generation = %self.generation, "Creating cache");
    }
    self.storage.open(&self.generation)
  }

  /// Look up a request in the current generation.
  pub fn match_request(&self, request: &Request) -> Result<Option<CacheResult<Response>>> {
    self.match_key(&request.key())
  }

  pub fn match_key(&self, key: &RequestKey) -> Result<Option<CacheResult<Response>>> {
    Ok(
      self
        .match_entry(key)?
        .map(|entry| CacheResult::from_cache(entry.response, entry.cached_at)),
    )
  }

  /// The stored entry for a request identity, as written.
  pub fn match_entry(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.storage.match_entry(&self.generation, key)
  }

  /// Store a response for a request in the current generation.
  pub fn put(&self, request: &Request, response: &Response) -> Result<(), AgentError> {
    check_storable(request, response)?;
    self
      .storage
      .put(&self.generation, &request.key(), response)
      .map_err(|e| AgentError::cache_write(request.url.as_str(), e))?;
    debug!(url = %request.url, generation = %self.generation, "Stored response");
    Ok(())
  }

  /// Store a batch of responses in one atomic write.
  pub fn put_all(&self, entries: &[(Request, Response)]) -> Result<(), AgentError> {
    let mut batch = Vec::with_capacity(entries.len());
    for (request, response) in entries {
      check_storable(request, response)?;
      batch.push((request.key(), response.clone()));
    }
    self
      .storage
      .put_all(&self.generation, &batch)
      .map_err(|e| AgentError::cache_write(self.generation.as_str(), e))
  }

  /// Delete every generation other than the current one.
  ///
  /// A failed deletion is logged and does not stop the others. Returns the
  /// names that were deleted.
  pub fn prune_stale(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.keys()? {
      if name == self.generation {
        continue;
      }
      info!(generation = %name, "Deleting old cache");
      match self.storage.delete(&name) {
        Ok(true) => deleted.push(name),
        Ok(false) => {}
        Err(e) => warn!(generation = %name, error = %e, "Failed to delete old cache"),
      }
    }
    Ok(deleted)
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: self.generation.clone(),
    }
  }
}

/// Reject writes the cache cannot hold.
fn check_storable(request: &Request, response: &Response) -> Result<(), AgentError> {
  if request.method != Method::Get {
    return Err(AgentError::cache_write(
      request.url.as_str(),
      format!("{} requests cannot be cached", request.method),
    ));
  }
  if response.status == 206 {
    return Err(AgentError::cache_write(
      request.url.as_str(),
      "partial responses cannot be cached",
    ));
  }
  Ok(())
}
