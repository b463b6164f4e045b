//! In-memory stand-ins for the network and the host.

use async_trait::async_trait;
use color_eyre::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::agent::{AgentError, Notification};
use crate::host::Host;
use crate::net::{Network, Request, Response};

pub const SCOPE: &str = "https://app.test/omr/";

/// Resolve a path (or absolute URL) against the test scope.
pub fn url(path: &str) -> Url {
  Url::parse(SCOPE).unwrap().join(path).unwrap()
}

/// Network serving canned responses. Unknown URLs get a 404.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, url: Url, response: Response) {
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  /// Serve a same-origin response for a path under the scope.
  pub fn serve(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) {
    let target = url(path);
    self.route(target.clone(), Response::new(target, status, body));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, AgentError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.offline.load(Ordering::SeqCst) {
      return Err(AgentError::network(request.url.as_str(), "offline"));
    }
    let routes = self.routes.lock().unwrap();
    Ok(
      routes
        .get(request.url.as_str())
        .cloned()
        .unwrap_or_else(|| Response::new(request.url.clone(), 404, "")),
    )
  }
}

/// Host that records every signal it receives.
#[derive(Default)]
pub struct RecordingHost {
  skip_waiting: AtomicUsize,
  claims: AtomicUsize,
  closed: AtomicUsize,
  notifications: Mutex<Vec<Notification>>,
  windows: Mutex<Vec<Url>>,
}

impl RecordingHost {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn skip_waiting_calls(&self) -> usize {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }

  pub fn closed(&self) -> usize {
    self.closed.load(Ordering::SeqCst)
  }

  pub fn notifications(&self) -> Vec<Notification> {
    self.notifications.lock().unwrap().clone()
  }

  pub fn windows(&self) -> Vec<Url> {
    self.windows.lock().unwrap().clone()
  }
}

#[async_trait]
impl Host for RecordingHost {
  fn skip_waiting(&self) {
    self.skip_waiting.fetch_add(1, Ordering::SeqCst);
  }

  fn claim_clients(&self) {
    self.claims.fetch_add(1, Ordering::SeqCst);
  }

  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.notifications.lock().unwrap().push(notification.clone());
    Ok(())
  }

  fn close_notification(&self, _notification: &Notification) {
    self.closed.fetch_add(1, Ordering::SeqCst);
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    self.windows.lock().unwrap().push(url.clone());
    Ok(())
  }
}
