use crate::error::{BoxError, TaskFailure};
use crate::handle::{self, Completer, ResultHandle, TaskState};

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Process-unique identifier of a submitted task.
pub type TaskId = u64;

/// The future a task body resolves to once started.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'static>>;

type TaskBody<T> = Box<dyn FnOnce(CancellationToken) -> TaskFuture<T> + Send + 'static>;

/// Which of the two task flavours a [`Task`] was built as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
  /// Runs for its side effects and yields `()`.
  Action,
  /// Produces a value.
  Computation,
}

/// A unit of work for the executor.
///
/// The body receives the task's `CancellationToken`. Cancellation is
/// cooperative: the engine only signals the token, it never drops a running
/// body. A body that wants to honour `cancel()` or `shutdown_now()` has to
/// check the token at its own safe points.
pub struct Task<T> {
  kind: TaskKind,
  body: TaskBody<T>,
}

impl<T: Send + 'static> Task<T> {
  /// Builds a value-producing task.
  pub fn computation<F, Fut, E>(f: F) -> Self
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    Self::with_kind(TaskKind::Computation, f)
  }

  fn with_kind<F, Fut, E>(kind: TaskKind, f: F) -> Self
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    let body: TaskBody<T> = Box::new(move |token| -> TaskFuture<T> {
      let fut = f(token);
      Box::pin(async move { fut.await.map_err(Into::<BoxError>::into) })
    });
    Self { kind, body }
  }

  pub fn kind(&self) -> TaskKind {
    self.kind
  }
}

impl Task<()> {
  /// Builds a side-effecting task.
  pub fn action<F, Fut, E>(f: F) -> Self
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
  {
    Self::with_kind(TaskKind::Action, f)
  }
}

impl<T> fmt::Debug for Task<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task").field("kind", &self.kind).finish_non_exhaustive()
  }
}

/// Type-erased queue entry. Lets the queue and workers carry tasks of any
/// output type.
pub(crate) trait Job: Send {
  fn id(&self) -> TaskId;

  fn kind(&self) -> TaskKind;

  fn state(&self) -> TaskState;

  /// Moves the handle from `Pending` to `Running`. Returns `false` when the
  /// handle already left `Pending` (cancelled while queued).
  fn begin(&self) -> bool;

  fn token(&self) -> CancellationToken;

  /// Runs the body and settles the handle. Resolves to the terminal state.
  fn run(self: Box<Self>) -> BoxFuture<'static, TaskState>;
}

pub(crate) type BoxedJob = Box<dyn Job>;

struct TypedJob<T: Send + 'static> {
  task: Task<T>,
  completer: Completer<T>,
}

impl<T: Send + 'static> Job for TypedJob<T> {
  fn id(&self) -> TaskId {
    self.completer.id()
  }

  fn kind(&self) -> TaskKind {
    self.task.kind
  }

  fn state(&self) -> TaskState {
    self.completer.state()
  }

  fn begin(&self) -> bool {
    self.completer.begin()
  }

  fn token(&self) -> CancellationToken {
    self.completer.token().clone()
  }

  fn run(self: Box<Self>) -> BoxFuture<'static, TaskState> {
    let TypedJob { task, completer } = *self;
    async move {
      let task_id = completer.id();
      let token = completer.token().clone();
      let body = task.body;
      let body_token = token.clone();
      let outcome = AssertUnwindSafe(async move { body(body_token).await })
        .catch_unwind()
        .await;

      match outcome {
        Ok(Ok(value)) => completer.complete(value),
        Ok(Err(err)) if token.is_cancelled() => {
          debug!(%task_id, "Task returned an error after its interrupt was signalled: {}. Treating as cancelled.", err);
          completer.cancel()
        }
        Ok(Err(err)) => {
          debug!(%task_id, "Task failed: {}", err);
          completer.fail(TaskFailure::from(err))
        }
        Err(panic_payload) => {
          let failure = TaskFailure::from_panic(panic_payload);
          error!(%task_id, "Task panicked during execution: {}", failure);
          completer.fail(failure)
        }
      }
    }
    .boxed()
  }
}

/// Allocates an id, pairs the task with a fresh handle and erases its type.
pub(crate) fn package<T: Send + 'static>(task: Task<T>) -> (ResultHandle<T>, BoxedJob) {
  let task_id = NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
  let (handle, completer) = handle::pair(task_id, task.kind);
  (handle, Box::new(TypedJob { task, completer }))
}

/// A task removed from the queue by `shutdown_now` before any worker
/// started it.
///
/// It can be handed to another executor with
/// [`ExecutorService::resubmit`](crate::ExecutorService::resubmit); the
/// original [`ResultHandle`] then observes that run. Dropping it (or calling
/// [`discard`](Self::discard)) settles the handle as cancelled.
pub struct NotStartedTask {
  job: BoxedJob,
}

impl NotStartedTask {
  pub(crate) fn new(job: BoxedJob) -> Self {
    Self { job }
  }

  pub(crate) fn into_job(self) -> BoxedJob {
    self.job
  }

  pub fn id(&self) -> TaskId {
    self.job.id()
  }

  pub fn kind(&self) -> TaskKind {
    self.job.kind()
  }

  /// Gives up on the task; its handle becomes `Cancelled`.
  pub fn discard(self) {
    debug!(task_id = %self.job.id(), "Discarding task that never started.");
  }
}

impl fmt::Debug for NotStartedTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NotStartedTask")
      .field("task_id", &self.job.id())
      .field("kind", &self.job.kind())
      .finish()
  }
}
