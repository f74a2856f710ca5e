use crate::error::{ExecutorError, TaskFailure};
use crate::task::{TaskId, TaskKind};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Observable lifecycle of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl TaskState {
  pub fn is_terminal(self) -> bool {
    matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
  }
}

enum Slot<T> {
  Pending,
  Running,
  Completed(T),
  Failed(TaskFailure),
  Cancelled,
}

impl<T> Slot<T> {
  fn state(&self) -> TaskState {
    match self {
      Slot::Pending => TaskState::Pending,
      Slot::Running => TaskState::Running,
      Slot::Completed(_) => TaskState::Completed,
      Slot::Failed(_) => TaskState::Failed,
      Slot::Cancelled => TaskState::Cancelled,
    }
  }
}

struct Shared<T> {
  task_id: TaskId,
  kind: TaskKind,
  token: CancellationToken,
  slot: Mutex<Slot<T>>,
  notify: Notify,
}

impl<T> Shared<T> {
  fn state(&self) -> TaskState {
    self.slot.lock().state()
  }

  /// Applies a terminal transition. Only the first one sticks.
  fn settle(&self, next: Slot<T>) -> TaskState {
    let mut slot = self.slot.lock();
    let current = slot.state();
    if current.is_terminal() {
      return current;
    }
    let settled = next.state();
    *slot = next;
    drop(slot);
    trace!(task_id = %self.task_id, "Handle settled as {:?}.", settled);
    self.notify.notify_waiters();
    settled
  }
}

/// Caller side of a submitted task.
///
/// Clones share the same outcome. Reading the outcome never consumes it, so
/// `get()` may be called any number of times from any number of clones.
pub struct ResultHandle<T> {
  shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultHandle<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T> fmt::Debug for ResultHandle<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultHandle")
      .field("task_id", &self.shared.task_id)
      .field("kind", &self.shared.kind)
      .field("state", &self.state())
      .finish()
  }
}

impl<T> ResultHandle<T> {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> TaskId {
    self.shared.task_id
  }

  pub fn kind(&self) -> TaskKind {
    self.shared.kind
  }

  pub fn state(&self) -> TaskState {
    self.shared.state()
  }

  pub fn is_done(&self) -> bool {
    self.state().is_terminal()
  }

  pub fn is_cancelled(&self) -> bool {
    self.state() == TaskState::Cancelled
  }

  /// Checks if an interrupt has been signalled to the task's token.
  pub fn is_cancellation_requested(&self) -> bool {
    self.shared.token.is_cancelled()
  }

  /// Requests cancellation.
  ///
  /// A pending task is cancelled outright and will never run. A running task
  /// only gets its token cancelled; it stops if and when its body notices.
  /// Returns whether the handle is now `Cancelled`.
  pub fn cancel(&self) -> bool {
    let mut slot = self.shared.slot.lock();
    match slot.state() {
      TaskState::Pending => {
        *slot = Slot::Cancelled;
        drop(slot);
        debug!(task_id = %self.shared.task_id, "Pending task cancelled before it started.");
        self.shared.token.cancel();
        self.shared.notify.notify_waiters();
        true
      }
      TaskState::Running => {
        drop(slot);
        debug!(task_id = %self.shared.task_id, "Running task signalled to cancel cooperatively.");
        self.shared.token.cancel();
        false
      }
      TaskState::Cancelled => true,
      TaskState::Completed | TaskState::Failed => false,
    }
  }

  /// Waits until the task reaches a terminal state and returns that state.
  pub async fn wait(&self) -> TaskState {
    loop {
      // Created before the check so a settle in between is not missed.
      let notified = self.shared.notify.notified();
      let state = self.state();
      if state.is_terminal() {
        return state;
      }
      notified.await;
    }
  }
}

impl<T: Clone> ResultHandle<T> {
  /// Returns the outcome if the task already reached a terminal state.
  pub fn try_get(&self) -> Option<Result<T, ExecutorError>> {
    match &*self.shared.slot.lock() {
      Slot::Completed(value) => Some(Ok(value.clone())),
      Slot::Failed(failure) => Some(Err(ExecutorError::ExecutionFailure(failure.clone()))),
      Slot::Cancelled => Some(Err(ExecutorError::Cancelled)),
      Slot::Pending | Slot::Running => None,
    }
  }

  /// Waits for the task and returns its value.
  ///
  /// # Errors
  /// Returns `ExecutorError::ExecutionFailure` if the body returned an error or panicked.
  /// Returns `ExecutorError::Cancelled` if the task was cancelled.
  pub async fn get(&self) -> Result<T, ExecutorError> {
    loop {
      if let Some(outcome) = self.try_get() {
        return outcome;
      }
      self.wait().await;
    }
  }

  /// Like [`get`](Self::get), but gives up with `ExecutorError::TimedOut`
  /// after `timeout`. The task itself keeps running.
  pub async fn get_timeout(&self, timeout: Duration) -> Result<T, ExecutorError> {
    match tokio::time::timeout(timeout, self.get()).await {
      Ok(outcome) => outcome,
      Err(_) => {
        debug!(task_id = %self.shared.task_id, "Timed out after {:?} waiting for task outcome.", timeout);
        Err(ExecutorError::TimedOut)
      }
    }
  }
}

/// Worker side of a handle, the only writer of a successful or failed outcome.
///
/// Dropping it before the handle is terminal settles the handle as
/// `Cancelled`, so waiters never hang on a task that will not run.
pub(crate) struct Completer<T> {
  shared: Arc<Shared<T>>,
}

impl<T> Completer<T> {
  pub(crate) fn id(&self) -> TaskId {
    self.shared.task_id
  }

  pub(crate) fn token(&self) -> &CancellationToken {
    &self.shared.token
  }

  pub(crate) fn state(&self) -> TaskState {
    self.shared.state()
  }

  pub(crate) fn begin(&self) -> bool {
    let mut slot = self.shared.slot.lock();
    if let Slot::Pending = *slot {
      *slot = Slot::Running;
      true
    } else {
      false
    }
  }

  pub(crate) fn complete(self, value: T) -> TaskState {
    self.shared.settle(Slot::Completed(value))
  }

  pub(crate) fn fail(self, failure: TaskFailure) -> TaskState {
    self.shared.settle(Slot::Failed(failure))
  }

  pub(crate) fn cancel(self) -> TaskState {
    self.shared.settle(Slot::Cancelled)
  }
}

impl<T> Drop for Completer<T> {
  fn drop(&mut self) {
    self.shared.settle(Slot::Cancelled);
  }
}

pub(crate) fn pair<T>(task_id: TaskId, kind: TaskKind) -> (ResultHandle<T>, Completer<T>) {
  let shared = Arc::new(Shared {
    task_id,
    kind,
    token: CancellationToken::new(),
    slot: Mutex::new(Slot::Pending),
    notify: Notify::new(),
  });
  (
    ResultHandle {
      shared: shared.clone(),
    },
    Completer { shared },
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::BoxError;

  #[tokio::test]
  async fn test_get_is_idempotent() {
    let (handle, completer) = pair::<String>(1, TaskKind::Computation);
    assert!(completer.begin());
    assert_eq!(completer.complete("done".to_string()), TaskState::Completed);

    assert_eq!(handle.get().await.unwrap(), "done");
    assert_eq!(handle.get().await.unwrap(), "done");
    assert_eq!(handle.clone().get().await.unwrap(), "done");
  }

  #[tokio::test]
  async fn test_only_first_terminal_transition_sticks() {
    let (handle, completer) = pair::<u32>(2, TaskKind::Computation);
    assert!(handle.cancel());
    assert!(!completer.begin(), "Cancelled handle must not start");
    assert_eq!(completer.complete(5), TaskState::Cancelled);
    assert!(matches!(handle.get().await, Err(ExecutorError::Cancelled)));
  }

  #[tokio::test]
  async fn test_cancel_running_only_signals_token() {
    let (handle, completer) = pair::<u32>(3, TaskKind::Computation);
    assert!(completer.begin());
    assert!(!handle.cancel());
    assert!(handle.is_cancellation_requested());
    assert_eq!(handle.state(), TaskState::Running);

    assert_eq!(completer.complete(9), TaskState::Completed);
    assert_eq!(handle.get().await.unwrap(), 9);
    assert!(!handle.cancel(), "cancel on a completed handle has no effect");
  }

  #[tokio::test]
  async fn test_failure_is_reported_on_every_read() {
    let (handle, completer) = pair::<u32>(4, TaskKind::Action);
    completer.begin();
    let err: BoxError = "broken".into();
    completer.fail(TaskFailure::from(err));

    for _ in 0..2 {
      match handle.get().await {
        Err(ExecutorError::ExecutionFailure(failure)) => assert_eq!(failure.to_string(), "broken"),
        other => panic!("Expected ExecutionFailure, got {:?}", other),
      }
    }
  }

  #[tokio::test]
  async fn test_dropped_completer_cancels_handle() {
    let (handle, completer) = pair::<u32>(5, TaskKind::Computation);
    drop(completer);
    assert_eq!(handle.wait().await, TaskState::Cancelled);
  }

  #[tokio::test]
  async fn test_get_timeout_does_not_cancel() {
    let (handle, completer) = pair::<u32>(6, TaskKind::Computation);
    completer.begin();
    let result = handle.get_timeout(Duration::from_millis(20)).await;
    assert!(matches!(result, Err(ExecutorError::TimedOut)));
    assert_eq!(handle.state(), TaskState::Running);
    assert!(!handle.is_cancellation_requested());
    completer.complete(1);
    assert_eq!(handle.get_timeout(Duration::from_millis(20)).await.unwrap(), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_waiters_are_woken_by_completion() {
    let (handle, completer) = pair::<u32>(7, TaskKind::Computation);
    let waiters: Vec<_> = (0..4)
      .map(|_| {
        let h = handle.clone();
        tokio::spawn(async move { h.get().await })
      })
      .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    completer.begin();
    completer.complete(42);

    for waiter in waiters {
      assert_eq!(waiter.await.unwrap().unwrap(), 42);
    }
    assert_eq!(handle.state(), TaskState::Completed);
  }
}
