//! The offline cache agent.
//!
//! `OfflineAgent` implements what happens for each lifecycle and
//! interception event. It never decides *when* those happen: the host drives
//! the lifecycle and `event::Dispatcher` routes events here.

mod error;
mod message;
mod notification;
mod tasks;

pub use error::AgentError;
pub use message::ControlMessage;
pub use notification::{Notification, PushPayload, ACTION_EXPLORE};
pub use tasks::TaskSet;

use chrono::Utc;
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheLayer, CacheResult, CacheStorage};
use crate::config::AgentConfig;
use crate::host::Host;
use crate::net::{Method, Network, Request, RequestKey, Response};

/// Sync tag the agent recognizes.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Cache-first request agent owning one cache generation.
#[derive(Clone)]
pub struct OfflineAgent {
  config: Arc<AgentConfig>,
  cache: CacheLayer,
  network: Arc<dyn Network>,
  host: Arc<dyn Host>,
  tasks: TaskSet,
}

impl OfflineAgent {
  pub fn new(
    config: AgentConfig,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
  ) -> Self {
    let cache = CacheLayer::new(storage, config.cache_name.clone());
    Self {
      config: Arc::new(config),
      cache,
      network,
      host,
      tasks: TaskSet::new(),
    }
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  pub fn host(&self) -> &Arc<dyn Host> {
    &self.host
  }

  /// Wait for pending background cache writes.
  pub async fn settle(&self) -> Vec<AgentError> {
    self.tasks.settle().await
  }

  /// Open the current generation and seed it.
  ///
  /// Seeding failures are logged. They only propagate when strict install
  /// is configured; otherwise installation still completes.
  pub async fn install(&self) -> Result<(), AgentError> {
    info!(generation = %self.cache.generation(), "Installing agent");

    let seeded = self.seed().await;
    if let Err(e) = &seeded {
      error!(error = %e, "Cache failed");
    }

    if self.config.strict_install {
      seeded
    } else {
      Ok(())
    }
  }

  /// Fetch every seed asset, then store them all at once.
  ///
  /// A single failed or non-2xx fetch aborts the whole batch before anything
  /// is written.
  async fn seed(&self) -> Result<(), AgentError> {
    self
      .cache
      .open()
      .map_err(|e| AgentError::seed_install(self.cache.generation(), e))?;

    info!(count = self.config.seed_assets.len(), "Caching seed assets");

    let fetches = self.config.seed_assets.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| AgentError::seed_install(url.as_str(), e))?;
      if !response.ok() {
        return Err(AgentError::seed_install(
          url.as_str(),
          format!("bad status {}", response.status),
        ));
      }
      Ok((request, response))
    });

    let entries = try_join_all(fetches).await?;

    self.cache.put_all(&entries).map_err(|e| match e {
      AgentError::CacheWrite { url, reason } => AgentError::SeedInstall { url, reason },
      other => other,
    })
  }

  /// Answer an intercepted request: cache first, then network.
  pub async fn respond(&self, request: Request) -> Result<CacheResult<Response>, AgentError> {
    match self.cache.match_request(&request) {
      Ok(Some(hit)) => {
        debug!(url = %request.url, "Serving from cache");
        return Ok(hit);
      }
      Ok(None) => {}
      Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, treating as miss"),
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_cacheable() {
          let cache = self.cache.clone();
          let copy = response.clone();
          let request = request.clone();
          self.tasks.spawn(async move { cache.put(&request, &copy) });
        } else {
          debug!(
            url = %request.url,
            status = response.status,
            response_type = response.response_type.as_str(),
            "Not caching response"
          );
        }
        Ok(CacheResult::from_network(response))
      }
      Err(e) => {
        if request.is_navigation() {
          if let Some(fallback) = self.offline_document() {
            info!(url = %request.url, "Network unavailable, serving offline document");
            return Ok(fallback);
          }
        }
        debug!(url = %request.url, error = %e, "Request failed");
        Err(e)
      }
    }
  }

  fn offline_document(&self) -> Option<CacheResult<Response>> {
    let key = RequestKey::new(Method::Get, &self.config.offline_fallback);
    match self.cache.match_entry(&key) {
      Ok(entry) => entry.map(|entry| CacheResult::offline(entry.response, entry.cached_at)),
      Err(e) => {
        warn!(error = %e, "Failed to read offline document");
        None
      }
    }
  }

  /// Delete every generation other than the current one.
  pub async fn activate(&self) -> Vec<String> {
    info!(generation = %self.cache.generation(), "Activating agent");
    match self.cache.prune_stale() {
      Ok(deleted) => deleted,
      Err(e) => {
        warn!(error = %e, "Failed to list old caches");
        Vec::new()
      }
    }
  }

  /// Handle a message posted by a page.
  pub fn handle_message(&self, data: &Value) {
    match ControlMessage::parse(data) {
      Some(ControlMessage::SkipWaiting) => self.host.skip_waiting(),
      None => debug!("Ignoring unrecognized message"),
    }
  }

  /// Show a notification for a push message carrying JSON data.
  pub async fn handle_push(&self, data: &[u8]) {
    let data: Value = match serde_json::from_slice(data) {
      Ok(data) => data,
      Err(e) => {
        warn!(error = %e, "Ignoring push message with invalid JSON");
        return;
      }
    };
    let Some(payload) = PushPayload::from_value(&data) else {
      debug!("Ignoring push message with null data");
      return;
    };

    let notification = Notification::from_push(payload, &self.config, Utc::now());
    if let Err(e) = self.host.show_notification(&notification).await {
      warn!(error = %e, "Failed to show notification");
    }
  }

  /// Close the notification, opening the app when "explore" was chosen.
  pub async fn handle_notification_click(&self, notification: &Notification, action: Option<&str>) {
    self.host.close_notification(notification);

    if action == Some(ACTION_EXPLORE) {
      let root = self.config.root();
      if let Err(e) = self.host.open_window(&root).await {
        warn!(error = %e, "Failed to open window");
      }
    }
  }

  /// Returns whether the tag was recognized. No work is performed yet.
  pub fn handle_sync(&self, tag: &str) -> bool {
    if tag == BACKGROUND_SYNC_TAG {
      info!("Background sync triggered");
      true
    } else {
      debug!(tag, "Ignoring sync event");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use super::notification::ACTION_CLOSE;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::net::{Destination, ResponseType};
  use crate::testing::{url, FakeNetwork, RecordingHost, SCOPE};
  use serde_json::json;

  struct Fixture {
    agent: OfflineAgent,
    storage: Arc<MemoryStorage>,
    network: Arc<FakeNetwork>,
    host: Arc<RecordingHost>,
  }

  fn fixture(config: AgentConfig) -> Fixture {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(FakeNetwork::new());
    let host = Arc::new(RecordingHost::new());
    let agent = OfflineAgent::new(config, storage.clone(), network.clone(), host.clone());
    Fixture {
      agent,
      storage,
      network,
      host,
    }
  }

  fn default_fixture() -> Fixture {
    let f = fixture(AgentConfig::new(url(SCOPE)));
    for path in ["./", "./index.html", "./manifest.json", "./sw.js"] {
      f.network.serve(path, 200, format!("seed {}", path));
    }
    f
  }

  #[tokio::test]
  async fn test_install_caches_every_seed() {
    let f = default_fixture();
    f.agent.install().await.unwrap();
    assert_eq!(f.network.calls(), 4);

    f.network.set_offline(true);
    for path in ["./", "./index.html", "./manifest.json", "./sw.js"] {
      let result = f.agent.respond(Request::get(url(path))).await.unwrap();
      assert_eq!(result.source, CacheSource::Cache, "{path}");
      assert_eq!(result.data.body, format!("seed {}", path).into_bytes());
    }
    assert_eq!(f.network.calls(), 4, "cache hits never touch the network");
  }

  #[tokio::test]
  async fn test_install_failure_is_absorbed_and_stores_nothing() {
    let f = default_fixture();
    f.network.serve("./sw.js", 404, "missing");

    assert!(f.agent.install().await.is_ok());
    assert!(f.storage.has(&f.agent.config().cache_name).unwrap());
    assert!(f.storage.entries(&f.agent.config().cache_name).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_strict_install_reports_failure() {
    let f = fixture(AgentConfig::new(url(SCOPE)).with_strict_install(true));
    f.network.set_offline(true);

    let err = f.agent.install().await.unwrap_err();
    assert!(matches!(err, AgentError::SeedInstall { .. }));
  }

  #[tokio::test]
  async fn test_network_200_basic_is_cached_once() {
    let f = default_fixture();
    f.network.serve("./app.js", 200, "console.log(1)");

    let first = f
      .agent
      .respond(Request::get(url("./app.js")).with_destination(Destination::Script))
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert!(f.agent.settle().await.is_empty());

    let generation = f.agent.config().cache_name.clone();
    assert_eq!(f.storage.entries(&generation).unwrap().len(), 1);

    let second = f.agent.respond(Request::get(url("./app.js"))).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data, first.data);
    assert_eq!(f.network.calls(), 1);
  }

  #[tokio::test]
  async fn test_uncacheable_responses_pass_through() {
    let f = default_fixture();
    f.network.serve("./missing.png", 404, "");
    f.network.serve("./created", 201, "");
    f.network.route(
      url("https://cdn.test/lib.js"),
      Response::new(url("https://cdn.test/lib.js"), 200, "lib").with_type(ResponseType::Opaque),
    );
    f.network.route(
      url("https://api.test/data"),
      Response::new(url("https://api.test/data"), 200, "{}").with_type(ResponseType::Cors),
    );

    for target in [
      "./missing.png",
      "./created",
      "https://cdn.test/lib.js",
      "https://api.test/data",
    ] {
      let result = f.agent.respond(Request::get(url(target))).await.unwrap();
      assert_eq!(result.source, CacheSource::Network);
    }
    f.agent.settle().await;

    let generation = f.agent.config().cache_name.clone();
    assert!(f.storage.entries(&generation).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_offline_navigation_serves_root_document() {
    let f = default_fixture();
    f.agent.install().await.unwrap();
    f.network.set_offline(true);

    let result = f
      .agent
      .respond(Request::navigate(url("./results/42")))
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.body, b"seed ./".to_vec());
  }

  #[tokio::test]
  async fn test_offline_navigation_without_fallback_fails() {
    let f = default_fixture();
    f.network.set_offline(true);

    let err = f
      .agent
      .respond(Request::navigate(url("./results/42")))
      .await
      .unwrap_err();
    assert!(matches!(err, AgentError::Network { .. }));
  }

  #[tokio::test]
  async fn test_offline_subresource_fails() {
    let f = default_fixture();
    f.agent.install().await.unwrap();
    f.network.set_offline(true);

    let err = f
      .agent
      .respond(Request::get(url("./app.js")).with_destination(Destination::Script))
      .await
      .unwrap_err();
    assert!(matches!(err, AgentError::Network { .. }));
  }

  #[tokio::test]
  async fn test_cache_write_failure_does_not_affect_response() {
    let f = default_fixture();
    f.network.serve("./api/submit", 200, "accepted");

    let result = f
      .agent
      .respond(Request::get(url("./api/submit")).with_method(Method::Post))
      .await
      .unwrap();
    assert_eq!(result.data.body, b"accepted".to_vec());

    let failures = f.agent.settle().await;
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], AgentError::CacheWrite { .. }));
  }

  #[tokio::test]
  async fn test_activate_removes_stale_generations() {
    let f = default_fixture();
    f.storage.open("omr-test-v6.14-github-pages").unwrap();
    f.storage.open("something-else").unwrap();
    f.agent.install().await.unwrap();

    let mut deleted = f.agent.activate().await;
    deleted.sort();
    assert_eq!(
      deleted,
      vec![
        "omr-test-v6.14-github-pages".to_string(),
        "something-else".to_string()
      ]
    );
    assert_eq!(
      f.storage.keys().unwrap(),
      vec![f.agent.config().cache_name.clone()]
    );

    assert!(f.agent.activate().await.is_empty());
  }

  #[tokio::test]
  async fn test_new_generation_starts_empty() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(FakeNetwork::new());
    network.serve("./", 200, "v1");
    let old = OfflineAgent::new(
      AgentConfig::new(url(SCOPE))
        .with_cache_name("v1")
        .with_seed_assets(vec![url("./")]),
      storage.clone(),
      network.clone(),
      Arc::new(RecordingHost::new()),
    );
    old.install().await.unwrap();

    let new = OfflineAgent::new(
      AgentConfig::new(url(SCOPE))
        .with_cache_name("v2")
        .with_seed_assets(Vec::new()),
      storage.clone(),
      network.clone(),
      Arc::new(RecordingHost::new()),
    );
    new.install().await.unwrap();
    new.activate().await;

    network.set_offline(true);
    assert!(new.respond(Request::get(url("./"))).await.is_err());
    assert_eq!(storage.keys().unwrap(), vec!["v2".to_string()]);
  }

  #[tokio::test]
  async fn test_skip_waiting_message() {
    let f = default_fixture();
    f.agent.handle_message(&json!({"type": "SKIP_WAITING"}));
    f.agent.handle_message(&json!({"type": "RELOAD"}));
    assert_eq!(f.host.skip_waiting_calls(), 1);
  }

  #[tokio::test]
  async fn test_push_shows_notification() {
    let f = default_fixture();
    f.agent
      .handle_push(br#"{"title":"T","body":"B","primaryKey":42}"#)
      .await;

    let shown = f.host.notifications();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "T");
    assert_eq!(shown[0].options.body.as_deref(), Some("B"));
    assert_eq!(shown[0].options.data.primary_key, Some(json!(42)));
  }

  #[tokio::test]
  async fn test_push_with_invalid_json_is_dropped() {
    let f = default_fixture();
    f.agent.handle_push(b"not json").await;
    f.agent.handle_push(b"null").await;
    assert!(f.host.notifications().is_empty());
  }

  #[tokio::test]
  async fn test_push_with_unexpected_shapes_still_notifies() {
    let f = default_fixture();
    f.agent
      .handle_push(br#"{"title":"Scan 7","body":42,"primaryKey":1}"#)
      .await;
    f.agent.handle_push(br#"{"title":7,"body":"B"}"#).await;
    f.agent.handle_push(br#""hello""#).await;

    let shown = f.host.notifications();
    assert_eq!(shown.len(), 3);
    assert_eq!(shown[0].title, "Scan 7");
    assert_eq!(shown[0].options.body.as_deref(), Some("42"));
    assert_eq!(shown[0].options.data.primary_key, Some(json!(1)));
    assert_eq!(shown[1].title, "7");
    assert_eq!(shown[1].options.body.as_deref(), Some("B"));
    assert_eq!(shown[2].title, "");
    assert!(shown[2].options.body.is_none());
  }

  #[tokio::test]
  async fn test_notification_click_actions() {
    let f = default_fixture();
    let notification =
      Notification::from_push(PushPayload::default(), f.agent.config(), Utc::now());

    f.agent
      .handle_notification_click(&notification, Some(ACTION_CLOSE))
      .await;
    f.agent.handle_notification_click(&notification, None).await;
    assert_eq!(f.host.closed(), 2);
    assert!(f.host.windows().is_empty());

    f.agent
      .handle_notification_click(&notification, Some(ACTION_EXPLORE))
      .await;
    assert_eq!(f.host.closed(), 3);
    assert_eq!(f.host.windows(), vec![url(SCOPE)]);
  }

  #[test]
  fn test_sync_tags() {
    let f = default_fixture();
    assert!(f.agent.handle_sync("background-sync"));
    assert!(!f.agent.handle_sync("periodic"));
  }
}
