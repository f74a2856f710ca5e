use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

/// Lifecycle of an executor. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
  /// Accepting and running tasks.
  Running,
  /// No longer accepting tasks; workers finish what they have.
  ShuttingDown,
  /// Shutdown was requested and every worker has exited.
  Terminated,
}

/// Tracks the executor's lifecycle and how many workers are still alive.
#[derive(Debug)]
pub(crate) struct ShutdownController {
  executor_name: Arc<String>,
  state: watch::Sender<ShutdownState>,
  live_workers: AtomicUsize,
  interrupting: AtomicBool,
}

impl ShutdownController {
  pub(crate) fn new(executor_name: Arc<String>, workers: usize) -> Self {
    let (state, _) = watch::channel(ShutdownState::Running);
    Self {
      executor_name,
      state,
      live_workers: AtomicUsize::new(workers),
      interrupting: AtomicBool::new(false),
    }
  }

  pub(crate) fn state(&self) -> ShutdownState {
    *self.state.borrow()
  }

  pub(crate) fn is_accepting(&self) -> bool {
    self.state() == ShutdownState::Running
  }

  /// Leaves `Running`. Returns `true` for the call that made the transition.
  ///
  /// Goes straight to `Terminated` when no worker is left, e.g. after the
  /// runtime the workers were spawned on has shut down.
  pub(crate) fn begin_shutdown(&self) -> bool {
    let mut terminated = false;
    let transitioned = self.state.send_if_modified(|state| {
      if *state != ShutdownState::Running {
        return false;
      }
      // Read under the channel lock, which `worker_exited` also takes.
      if self.live_workers.load(Ordering::SeqCst) == 0 {
        *state = ShutdownState::Terminated;
        terminated = true;
      } else {
        *state = ShutdownState::ShuttingDown;
      }
      true
    });
    if terminated {
      info!(executor = %*self.executor_name, "No live workers at shutdown. Executor terminated.");
    }
    transitioned
  }

  /// Marks that running tasks should be interrupted. Workers starting a task
  /// after this point interrupt it themselves.
  pub(crate) fn request_interrupt(&self) {
    self.interrupting.store(true, Ordering::SeqCst);
  }

  pub(crate) fn is_interrupting(&self) -> bool {
    self.interrupting.load(Ordering::SeqCst)
  }

  pub(crate) fn live_workers(&self) -> usize {
    self.live_workers.load(Ordering::SeqCst)
  }

  /// Registers a running worker loop. The guard reports the exit when dropped.
  pub(crate) fn worker_guard(self: &Arc<Self>) -> WorkerExitGuard {
    WorkerExitGuard {
      controller: self.clone(),
    }
  }

  fn worker_exited(&self) {
    let remaining = self.live_workers.fetch_sub(1, Ordering::SeqCst) - 1;
    debug!(executor = %*self.executor_name, remaining, "Worker exited.");
    if remaining > 0 {
      return;
    }
    // Without a shutdown request the state stays `Running`; `begin_shutdown`
    // finishes the job later.
    let terminated = self.state.send_if_modified(|state| {
      if *state == ShutdownState::ShuttingDown {
        *state = ShutdownState::Terminated;
        true
      } else {
        false
      }
    });
    if terminated {
      info!(executor = %*self.executor_name, "All workers exited. Executor terminated.");
    } else {
      debug!(executor = %*self.executor_name, "All workers exited before shutdown was requested.");
    }
  }

  /// Waits until the executor is `Terminated` or `timeout` elapses.
  pub(crate) async fn await_termination(&self, timeout: Duration) -> bool {
    let mut rx = self.state.subscribe();
    let outcome = tokio::time::timeout(timeout, rx.wait_for(|state| *state == ShutdownState::Terminated)).await;
    matches!(outcome, Ok(Ok(_)))
  }
}

/// Held by a worker loop for its whole life.
pub(crate) struct WorkerExitGuard {
  controller: Arc<ShutdownController>,
}

impl Drop for WorkerExitGuard {
  fn drop(&mut self) {
    self.controller.worker_exited();
  }
}
