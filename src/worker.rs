use crate::shutdown::{ShutdownController, WorkerExitGuard};
use crate::task::TaskId;
use crate::task_queue::TaskQueue;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, Instrument};

/// Fixed set of worker loops pulling from one shared queue.
#[derive(Debug)]
pub(crate) struct WorkerPool {
  size: usize,
  in_flight: Arc<DashMap<TaskId, CancellationToken>>,
}

impl WorkerPool {
  pub(crate) fn start(
    executor_name: Arc<String>,
    size: usize,
    queue: Arc<TaskQueue>,
    controller: Arc<ShutdownController>,
    tokio_handle: &TokioHandle,
  ) -> Self {
    let in_flight = Arc::new(DashMap::new());

    for worker_id in 0..size {
      let worker_name = executor_name.clone();
      let worker_queue = queue.clone();
      let worker_controller = controller.clone();
      let worker_in_flight = in_flight.clone();
      // Taken before spawning so a loop that is never polled still counts as exited.
      let exit_guard = controller.worker_guard();

      tokio_handle.spawn(
        Self::run_worker_loop(worker_id, worker_name, worker_queue, worker_controller, worker_in_flight, exit_guard)
          .instrument(info_span!("executor_worker", executor = %*executor_name, worker_id)),
      );
    }

    Self { size, in_flight }
  }

  pub(crate) fn size(&self) -> usize {
    self.size
  }

  pub(crate) fn active_count(&self) -> usize {
    self.in_flight.len()
  }

  /// Signals the cancellation token of every task currently running.
  pub(crate) fn interrupt_all(&self) -> usize {
    let mut interrupted = 0;
    for entry in self.in_flight.iter() {
      debug!(task_id = %entry.key(), "Interrupting running task.");
      entry.value().cancel();
      interrupted += 1;
    }
    interrupted
  }

  async fn run_worker_loop(
    worker_id: usize,
    executor_name: Arc<String>,
    queue: Arc<TaskQueue>,
    controller: Arc<ShutdownController>,
    in_flight: Arc<DashMap<TaskId, CancellationToken>>,
    _exit_guard: WorkerExitGuard,
  ) {
    info!(executor = %*executor_name, worker_id, "Worker loop started.");

    while let Some(job) = queue.dequeue().await {
      let task_id = job.id();
      if !job.begin() {
        debug!(executor = %*executor_name, %task_id, "Dequeued task already cancelled, skipping.");
        continue;
      }

      let token = job.token();
      in_flight.insert(task_id, token.clone());
      // shutdown_now may have swept the in-flight map before this insert.
      if controller.is_interrupting() {
        token.cancel();
      }

      debug!(executor = %*executor_name, %task_id, kind = ?job.kind(), "Running task.");
      let final_state = job.run().await;
      in_flight.remove(&task_id);
      trace!(executor = %*executor_name, %task_id, state = ?final_state, "Task finished.");
    }

    info!(executor = %*executor_name, worker_id, "Task queue closed and empty. Worker loop stopped.");
  }
}
