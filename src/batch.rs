//! Batch submission: wait for every task, or for the first success.

use crate::error::ExecutorError;
use crate::executor::ExecutorService;
use crate::handle::ResultHandle;
use crate::task::Task;

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

impl ExecutorService {
  /// Submits every task in order and waits until all of them are done.
  ///
  /// The returned handles line up with the input, whatever order the tasks
  /// finished in. Individual failures do not stop the batch; each handle
  /// carries its own outcome.
  ///
  /// # Errors
  /// Returns `ExecutorError::Rejected` if the executor is shutting down. Tasks
  /// of the batch that were already queued are cancelled.
  pub async fn invoke_all<T, I>(&self, tasks: I) -> Result<Vec<ResultHandle<T>>, ExecutorError>
  where
    T: Send + 'static,
    I: IntoIterator<Item = Task<T>>,
  {
    let handles = self.submit_batch(tasks)?;
    for handle in &handles {
      handle.wait().await;
    }
    Ok(handles)
  }

  /// Like [`invoke_all`](Self::invoke_all), but stops waiting after
  /// `timeout`. Tasks not done by then are cancelled (cooperatively, if
  /// already running) and their handles are returned as they are.
  pub async fn invoke_all_timeout<T, I>(
    &self,
    tasks: I,
    timeout: Duration,
  ) -> Result<Vec<ResultHandle<T>>, ExecutorError>
  where
    T: Send + 'static,
    I: IntoIterator<Item = Task<T>>,
  {
    let handles = self.submit_batch(tasks)?;
    let all_done = async {
      for handle in &handles {
        handle.wait().await;
      }
    };
    if tokio::time::timeout(timeout, all_done).await.is_err() {
      debug!(executor = %self.name(), "invoke_all timed out after {:?}.", timeout);
    }
    for handle in handles.iter().filter(|handle| !handle.is_done()) {
      handle.cancel();
    }
    Ok(handles)
  }

  /// Submits every task and returns the value of the first one to complete
  /// successfully. The others are cancelled on a best-effort basis and
  /// their outcomes are ignored.
  ///
  /// # Errors
  /// Returns `ExecutorError::NoTasks` for an empty batch,
  /// `ExecutorError::AggregateFailure` with every task's error (in input
  /// order) if none succeeded, and `ExecutorError::Rejected` if the executor
  /// is shutting down.
  pub async fn invoke_any<T, I>(&self, tasks: I) -> Result<T, ExecutorError>
  where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Task<T>>,
  {
    let handles = self.submit_batch(tasks)?;
    if handles.is_empty() {
      return Err(ExecutorError::NoTasks);
    }
    self.first_success(&handles).await
  }

  /// Like [`invoke_any`](Self::invoke_any), but gives up with
  /// `ExecutorError::TimedOut` after `timeout`, cancelling the whole batch.
  pub async fn invoke_any_timeout<T, I>(&self, tasks: I, timeout: Duration) -> Result<T, ExecutorError>
  where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Task<T>>,
  {
    let handles = self.submit_batch(tasks)?;
    if handles.is_empty() {
      return Err(ExecutorError::NoTasks);
    }
    match tokio::time::timeout(timeout, self.first_success(&handles)).await {
      Ok(outcome) => outcome,
      Err(_) => {
        debug!(executor = %self.name(), "invoke_any timed out after {:?}. Cancelling batch.", timeout);
        for handle in &handles {
          handle.cancel();
        }
        Err(ExecutorError::TimedOut)
      }
    }
  }

  fn submit_batch<T, I>(&self, tasks: I) -> Result<Vec<ResultHandle<T>>, ExecutorError>
  where
    T: Send + 'static,
    I: IntoIterator<Item = Task<T>>,
  {
    let mut handles = Vec::new();
    for task in tasks {
      match self.submit(task) {
        Ok(handle) => handles.push(handle),
        Err(err) => {
          for handle in &handles {
            handle.cancel();
          }
          return Err(err);
        }
      }
    }
    Ok(handles)
  }

  async fn first_success<T: Clone>(&self, handles: &[ResultHandle<T>]) -> Result<T, ExecutorError> {
    let mut outcomes: FuturesUnordered<_> = handles
      .iter()
      .enumerate()
      .map(|(index, handle)| async move { (index, handle.get().await) })
      .collect();
    let mut failures: Vec<Option<ExecutorError>> = vec![None; handles.len()];

    // Outcomes arrive in completion order; the first success is the winner.
    while let Some((index, outcome)) = outcomes.next().await {
      match outcome {
        Ok(value) => {
          debug!(executor = %self.name(), task_id = %handles[index].id(), "invoke_any winner found. Cancelling the rest.");
          for (other, handle) in handles.iter().enumerate() {
            if other != index {
              handle.cancel();
            }
          }
          return Ok(value);
        }
        Err(err) => failures[index] = Some(err),
      }
    }

    Err(ExecutorError::AggregateFailure(failures.into_iter().flatten().collect()))
  }
}
