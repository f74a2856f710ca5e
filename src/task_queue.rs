use crate::task::BoxedJob;

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

struct QueueState {
  jobs: VecDeque<BoxedJob>,
  closed: bool,
}

/// Unbounded, multi-producer, multi-consumer FIFO of pending jobs.
///
/// Producers push under the mutex and wake one waiting worker. Closing wakes
/// every worker; after that a worker keeps draining what is left and gets
/// `None` once the queue is empty.
pub(crate) struct TaskQueue {
  state: Mutex<QueueState>,
  available: Notify,
}

impl fmt::Debug for TaskQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("TaskQueue")
      .field("len", &state.jobs.len())
      .field("closed", &state.closed)
      .finish()
  }
}

impl TaskQueue {
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(QueueState {
        jobs: VecDeque::new(),
        closed: false,
      }),
      available: Notify::new(),
    }
  }

  /// Appends a job. Hands the job back if the queue was closed.
  pub(crate) fn enqueue(&self, job: BoxedJob) -> Result<(), BoxedJob> {
    let mut state = self.state.lock();
    if state.closed {
      return Err(job);
    }
    trace!(task_id = %job.id(), position = state.jobs.len(), "Job enqueued.");
    state.jobs.push_back(job);
    drop(state);
    self.available.notify_one();
    Ok(())
  }

  /// Takes the oldest job, waiting for one if the queue is empty.
  ///
  /// Returns `None` only once the queue is closed and empty.
  pub(crate) async fn dequeue(&self) -> Option<BoxedJob> {
    loop {
      let notified = self.available.notified();
      {
        let mut state = self.state.lock();
        if let Some(job) = state.jobs.pop_front() {
          return Some(job);
        }
        if state.closed {
          return None;
        }
      }
      notified.await;
    }
  }

  /// Stops accepting jobs. Jobs already queued stay for the workers.
  pub(crate) fn close(&self) {
    self.state.lock().closed = true;
    self.available.notify_waiters();
  }

  /// Closes the queue and removes every job no worker has taken yet.
  pub(crate) fn close_and_drain(&self) -> Vec<BoxedJob> {
    let drained: Vec<BoxedJob> = {
      let mut state = self.state.lock();
      state.closed = true;
      state.jobs.drain(..).collect()
    };
    trace!(count = drained.len(), "Queue closed and drained.");
    self.available.notify_waiters();
    drained
  }

  pub(crate) fn len(&self) -> usize {
    self.state.lock().jobs.len()
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.state.lock().closed
  }
}
