use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::AgentError;

/// Detached background work owned by the agent.
///
/// Nothing on the response path waits for these tasks. `settle` exists so
/// callers that need determinism (tests, process exit) can drain them.
#[derive(Clone, Default)]
pub struct TaskSet {
  inner: Arc<Mutex<Pending>>,
}

#[derive(Default)]
struct Pending {
  running: JoinSet<Result<(), AgentError>>,
  /// Failures of tasks reaped before `settle` ran
  failed: Vec<AgentError>,
}

impl Pending {
  /// Collect tasks that already finished without waiting on the rest.
  fn reap(&mut self) {
    while let Some(joined) = self.running.try_join_next() {
      record(joined, &mut self.failed);
    }
  }
}

fn record(
  joined: Result<Result<(), AgentError>, tokio::task::JoinError>,
  failures: &mut Vec<AgentError>,
) {
  match joined {
    Ok(Ok(())) => {}
    Ok(Err(e)) => {
      debug!(error = %e, "Background task failed");
      failures.push(e);
    }
    Err(e) => warn!(error = %e, "Background task did not complete"),
  }
}

impl TaskSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn a task onto the current tokio runtime.
  pub fn spawn<F>(&self, task: F)
  where
    F: Future<Output = Result<(), AgentError>> + Send + 'static,
  {
    let mut pending = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    pending.reap();
    pending.running.spawn(task);
  }

  /// Number of tasks still held in the set.
  #[cfg(test)]
  pub fn len(&self) -> usize {
    self
      .inner
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .running
      .len()
  }

  /// Wait for every outstanding task, including ones spawned while waiting,
  /// and return the failures.
  pub async fn settle(&self) -> Vec<AgentError> {
    let mut failures = Vec::new();
    loop {
      let Pending {
        mut running,
        failed,
      } = std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner));
      failures.extend(failed);
      if running.is_empty() {
        break;
      }
      while let Some(joined) = running.join_next().await {
        record(joined, &mut failures);
      }
    }
    failures
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  #[tokio::test]
  async fn test_settle_waits_for_all_tasks() {
    let tasks = TaskSet::new();
    let counter = Arc::new(AtomicU32::new(0));

    for delay in [30u64, 10, 20] {
      let counter = counter.clone();
      tasks.spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
    }
    assert_eq!(tasks.len(), 3);

    let failures = tasks.settle().await;
    assert!(failures.is_empty());
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(tasks.len(), 0);
  }

  #[tokio::test]
  async fn test_settle_collects_failures() {
    let tasks = TaskSet::new();
    tasks.spawn(async { Ok(()) });
    tasks.spawn(async { Err(AgentError::cache_write("https://app.test/a.js", "disk full")) });

    let failures = tasks.settle().await;
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], AgentError::CacheWrite { .. }));
  }

  #[tokio::test]
  async fn test_settle_includes_tasks_spawned_meanwhile() {
    let tasks = TaskSet::new();
    let counter = Arc::new(AtomicU32::new(0));

    let inner_tasks = tasks.clone();
    let inner_counter = counter.clone();
    tasks.spawn(async move {
      let c = inner_counter.clone();
      inner_tasks.spawn(async move {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
      inner_counter.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });

    tasks.settle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_settle_on_empty_set() {
    assert!(TaskSet::new().settle().await.is_empty());
  }

  #[tokio::test]
  async fn test_spawn_reaps_finished_tasks() {
    let tasks = TaskSet::new();

    for i in 0..5 {
      let (done_tx, done_rx) = tokio::sync::oneshot::channel();
      tasks.spawn(async move {
        let _ = done_tx.send(());
        if i == 2 {
          return Err(AgentError::cache_write("https://app.test/omr/b.js", "disk full"));
        }
        Ok(())
      });
      done_rx.await.unwrap();
      tokio::task::yield_now().await;
    }

    // Earlier tasks finished and were collected by later spawns
    assert!(tasks.len() <= 1);

    let failures = tasks.settle().await;
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], AgentError::CacheWrite { .. }));
    assert_eq!(tasks.len(), 0);
  }
}
