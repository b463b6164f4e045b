//! Event dispatch.
//!
//! Every interaction with the agent arrives as an `AgentEvent`. The
//! `Dispatcher` looks up the handler for its kind and gives it an
//! `EventContext`. Handlers are plain functions: they register the response
//! (`respond_with`) and any work the host must wait for (`wait_until`), and
//! the dispatcher drives those futures to completion.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, warn};

use crate::agent::{AgentError, Notification, OfflineAgent};
use crate::cache::CacheResult;
use crate::net::{Request, Response};

/// Events delivered by the host.
#[derive(Debug, Clone)]
pub enum AgentEvent {
  Install,
  Activate,
  /// A controlled page made a request
  Fetch(Request),
  /// A page posted a message
  Message(Value),
  /// A push message arrived, with its raw data if any
  Push(Option<Vec<u8>>),
  /// The user interacted with a notification
  NotificationClick {
    notification: Notification,
    action: Option<String>,
  },
  Sync {
    tag: String,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Message,
  Push,
  NotificationClick,
  Sync,
}

impl AgentEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::Install => EventKind::Install,
      Self::Activate => EventKind::Activate,
      Self::Fetch(_) => EventKind::Fetch,
      Self::Message(_) => EventKind::Message,
      Self::Push(_) => EventKind::Push,
      Self::NotificationClick { .. } => EventKind::NotificationClick,
      Self::Sync { .. } => EventKind::Sync,
    }
  }
}

type ResponseFuture = BoxFuture<'static, Result<CacheResult<Response>, AgentError>>;
type PendingFuture = BoxFuture<'static, Result<(), AgentError>>;

/// Per-event state handed to a handler.
pub struct EventContext {
  event: AgentEvent,
  response: Option<ResponseFuture>,
  pending: Vec<PendingFuture>,
}

impl EventContext {
  pub fn new(event: AgentEvent) -> Self {
    Self {
      event,
      response: None,
      pending: Vec::new(),
    }
  }

  pub fn event(&self) -> &AgentEvent {
    &self.event
  }

  /// Provide the response for a fetch event. Only the first call counts.
  pub fn respond_with<F>(&mut self, response: F) -> bool
  where
    F: Future<Output = Result<CacheResult<Response>, AgentError>> + Send + 'static,
  {
    if self.response.is_some() {
      warn!("respond_with called more than once, ignoring");
      return false;
    }
    self.response = Some(response.boxed());
    true
  }

  /// Keep the event alive until `work` settles.
  pub fn wait_until<F>(&mut self, work: F)
  where
    F: Future<Output = Result<(), AgentError>> + Send + 'static,
  {
    self.pending.push(work.boxed());
  }

  async fn settle(self) -> DispatchOutcome {
    let Self { response, pending, .. } = self;
    let response = async move {
      match response {
        Some(response) => Some(response.await),
        None => None,
      }
    };
    let (response, results) = futures::join!(response, join_all(pending));

    DispatchOutcome {
      response,
      failures: results.into_iter().filter_map(Result::err).collect(),
    }
  }
}

/// What a dispatched event produced once all of its work settled.
#[derive(Debug)]
pub struct DispatchOutcome {
  /// Result passed to `respond_with`, if the handler responded
  pub response: Option<Result<CacheResult<Response>, AgentError>>,
  /// Failures of `wait_until` work
  pub failures: Vec<AgentError>,
}

impl DispatchOutcome {
  #[cfg(test)]
  pub fn is_ok(&self) -> bool {
    self.failures.is_empty() && !matches!(self.response, Some(Err(_)))
  }
}

pub type Handler = fn(&OfflineAgent, &mut EventContext);

/// Routes events to handlers by kind.
pub struct Dispatcher {
  agent: OfflineAgent,
  handlers: HashMap<EventKind, Handler>,
}

impl Dispatcher {
  /// Create a dispatcher with the agent's standard handlers.
  pub fn new(agent: OfflineAgent) -> Self {
    Self::empty(agent)
      .on(EventKind::Install, on_install)
      .on(EventKind::Activate, on_activate)
      .on(EventKind::Fetch, on_fetch)
      .on(EventKind::Message, on_message)
      .on(EventKind::Push, on_push)
      .on(EventKind::NotificationClick, on_notification_click)
      .on(EventKind::Sync, on_sync)
  }

  /// Create a dispatcher without any handlers.
  pub fn empty(agent: OfflineAgent) -> Self {
    Self {
      agent,
      handlers: HashMap::new(),
    }
  }

  /// Register (or replace) the handler for an event kind.
  pub fn on(mut self, kind: EventKind, handler: Handler) -> Self {
    self.handlers.insert(kind, handler);
    self
  }

  pub fn agent(&self) -> &OfflineAgent {
    &self.agent
  }

  /// Run the handler for `event` and wait for everything it registered.
  pub async fn dispatch(&self, event: AgentEvent) -> DispatchOutcome {
    let kind = event.kind();
    let mut ctx = EventContext::new(event);

    match self.handlers.get(&kind) {
      Some(handler) => handler(&self.agent, &mut ctx),
      None => debug!(?kind, "No handler registered"),
    }

    ctx.settle().await
  }
}

fn on_install(agent: &OfflineAgent, ctx: &mut EventContext) {
  let worker = agent.clone();
  ctx.wait_until(async move { worker.install().await });
  agent.host().skip_waiting();
}

fn on_activate(agent: &OfflineAgent, ctx: &mut EventContext) {
  let worker = agent.clone();
  ctx.wait_until(async move {
    worker.activate().await;
    Ok(())
  });
  agent.host().claim_clients();
}

fn on_fetch(agent: &OfflineAgent, ctx: &mut EventContext) {
  let AgentEvent::Fetch(request) = ctx.event() else {
    return;
  };
  let request = request.clone();
  let worker = agent.clone();
  ctx.respond_with(async move { worker.respond(request).await });
}

fn on_message(agent: &OfflineAgent, ctx: &mut EventContext) {
  if let AgentEvent::Message(data) = ctx.event() {
    agent.handle_message(data);
  }
}

fn on_push(agent: &OfflineAgent, ctx: &mut EventContext) {
  let AgentEvent::Push(Some(data)) = ctx.event() else {
    return;
  };
  let data = data.clone();
  let worker = agent.clone();
  ctx.wait_until(async move {
    worker.handle_push(&data).await;
    Ok(())
  });
}

fn on_notification_click(agent: &OfflineAgent, ctx: &mut EventContext) {
  let AgentEvent::NotificationClick {
    notification,
    action,
  } = ctx.event()
  else {
    return;
  };
  let notification = notification.clone();
  let action = action.clone();
  let worker = agent.clone();
  ctx.wait_until(async move {
    worker
      .handle_notification_click(&notification, action.as_deref())
      .await;
    Ok(())
  });
}

fn on_sync(agent: &OfflineAgent, ctx: &mut EventContext) {
  if let AgentEvent::Sync { tag } = ctx.event() {
    agent.handle_sync(tag);
  }
}
