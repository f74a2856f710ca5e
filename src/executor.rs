use crate::error::ExecutorError;
use crate::handle::{ResultHandle, TaskState};
use crate::shutdown::{ShutdownController, ShutdownState};
use crate::task::{self, BoxedJob, NotStartedTask, Task};
use crate::task_queue::TaskQueue;
use crate::worker::WorkerPool;

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, info, trace, warn};

/// Runs submitted tasks on a fixed pool of workers.
///
/// Tasks are queued in an unbounded FIFO and picked up by the first free
/// worker. Every submission yields a [`ResultHandle`]. Shutdown is either
/// graceful ([`shutdown`](Self::shutdown)) or forceful
/// ([`shutdown_now`](Self::shutdown_now)); both return immediately and
/// [`await_termination`](Self::await_termination) waits for the workers to
/// exit.
///
/// Interruption is cooperative. A task that never looks at its
/// `CancellationToken` keeps running after `shutdown_now`, and the executor
/// does not terminate until it returns.
#[derive(Debug)]
pub struct ExecutorService {
  name: Arc<String>,
  queue: Arc<TaskQueue>,
  controller: Arc<ShutdownController>,
  workers: WorkerPool,
}

impl ExecutorService {
  /// Creates an executor with `pool_size` workers (at least one) spawned on
  /// `tokio_handle`.
  pub fn new(pool_size: usize, tokio_handle: TokioHandle, name: &str) -> Arc<Self> {
    let pool_size = pool_size.max(1);
    let name = Arc::new(name.to_string());
    let queue = Arc::new(TaskQueue::new());
    let controller = Arc::new(ShutdownController::new(name.clone(), pool_size));
    let workers = WorkerPool::start(name.clone(), pool_size, queue.clone(), controller.clone(), &tokio_handle);

    info!(executor = %*name, pool_size, "Executor started.");

    Arc::new(Self {
      name,
      queue,
      controller,
      workers,
    })
  }

  /// Creates an executor backed by a single worker, so tasks run one at a
  /// time in submission order.
  pub fn single_thread(tokio_handle: TokioHandle, name: &str) -> Arc<Self> {
    Self::new(1, tokio_handle, name)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn pool_size(&self) -> usize {
    self.workers.size()
  }

  pub fn state(&self) -> ShutdownState {
    self.controller.state()
  }

  /// Returns `true` once `shutdown` or `shutdown_now` has been called.
  pub fn is_shutdown(&self) -> bool {
    self.state() != ShutdownState::Running
  }

  /// Returns `true` once shutdown was requested and every worker exited.
  pub fn is_terminated(&self) -> bool {
    self.state() == ShutdownState::Terminated
  }

  /// Number of tasks currently being run by a worker.
  pub fn active_task_count(&self) -> usize {
    self.workers.active_count()
  }

  /// Number of tasks waiting in the queue.
  pub fn queued_task_count(&self) -> usize {
    self.queue.len()
  }

  /// Queues a task and returns its handle without waiting.
  ///
  /// # Errors
  /// Returns `ExecutorError::Rejected` once shutdown has been initiated.
  pub fn submit<T: Send + 'static>(&self, task: Task<T>) -> Result<ResultHandle<T>, ExecutorError> {
    if !self.controller.is_accepting() || self.queue.is_closed() {
      warn!(executor = %*self.name, "Submit: Attempted to submit task to an executor that is shutting down.");
      return Err(ExecutorError::Rejected);
    }

    let (handle, job) = task::package(task);
    self.enqueue(job)?;
    Ok(handle)
  }

  /// Fire-and-forget variant of [`submit`](Self::submit). The outcome,
  /// including any failure, stays in a handle nobody reads.
  pub fn execute<T: Send + 'static>(&self, task: Task<T>) -> Result<(), ExecutorError> {
    let handle = self.submit(task)?;
    trace!(executor = %*self.name, task_id = %handle.id(), "Task executed without an observer.");
    Ok(())
  }

  /// Queues a task drained from another executor by `shutdown_now`. Its
  /// original handle observes the new run.
  ///
  /// # Errors
  /// Returns `ExecutorError::Rejected` once shutdown has been initiated; the
  /// task's handle is then settled as cancelled.
  pub fn resubmit(&self, task: NotStartedTask) -> Result<(), ExecutorError> {
    if !self.controller.is_accepting() {
      warn!(executor = %*self.name, task_id = %task.id(), "Resubmit: Executor is shutting down, dropping task.");
      return Err(ExecutorError::Rejected);
    }
    self.enqueue(task.into_job())
  }

  fn enqueue(&self, job: BoxedJob) -> Result<(), ExecutorError> {
    let task_id = job.id();
    match self.queue.enqueue(job) {
      Ok(()) => {
        debug!(executor = %*self.name, %task_id, "Task submitted to queue.");
        Ok(())
      }
      Err(_rejected_job) => {
        warn!(executor = %*self.name, %task_id, "Submit: Queue closed by a concurrent shutdown, task rejected.");
        Err(ExecutorError::Rejected)
      }
    }
  }

  /// Stops accepting tasks. Queued and running tasks still run to
  /// completion. Does not wait.
  pub fn shutdown(&self) {
    // The queue closes first, so no submission is accepted once the state
    // has left `Running`.
    self.queue.close();
    if self.controller.begin_shutdown() {
      info!(
        executor = %*self.name,
        queued = self.queue.len(),
        active = self.workers.active_count(),
        "Initiating graceful shutdown. Queued and running tasks will complete."
      );
    } else {
      debug!(executor = %*self.name, "Shutdown already in progress.");
    }
  }

  /// Stops accepting tasks, removes every queued task that has not started
  /// and signals every running task's token. Does not wait.
  ///
  /// Returns the removed tasks. Tasks cancelled through their handle while
  /// still queued are not included.
  pub fn shutdown_now(&self) -> Vec<NotStartedTask> {
    self.controller.request_interrupt();
    let drained = self.queue.close_and_drain();
    if self.controller.begin_shutdown() {
      info!(executor = %*self.name, "Initiating forceful shutdown.");
    } else {
      info!(executor = %*self.name, "Forceful shutdown requested while already shutting down.");
    }
    let interrupted = self.workers.interrupt_all();

    let not_started: Vec<NotStartedTask> = drained
      .into_iter()
      .filter(|job| job.state() == TaskState::Pending)
      .map(NotStartedTask::new)
      .collect();

    info!(
      executor = %*self.name,
      not_started = not_started.len(),
      interrupted,
      "Queue drained and running tasks interrupted."
    );
    not_started
  }

  /// Waits until shutdown was requested and every worker has exited, or
  /// `timeout` elapses. Returns whether the executor terminated.
  pub async fn await_termination(&self, timeout: Duration) -> bool {
    let terminated = self.controller.await_termination(timeout).await;
    if !terminated {
      debug!(
        executor = %*self.name,
        state = ?self.state(),
        active = self.workers.active_count(),
        live_workers = self.controller.live_workers(),
        "Executor did not terminate within {:?}.",
        timeout
      );
    }
    terminated
  }
}

impl Drop for ExecutorService {
  fn drop(&mut self) {
    self.queue.close();
    if self.controller.begin_shutdown() {
      info!(
        executor = %*self.name,
        "ExecutorService dropped without shutdown. Initiating implicit graceful shutdown."
      );
    } else {
      trace!(executor = %*self.name, "Drop: Shutdown already in progress or completed.");
    }
  }
}
