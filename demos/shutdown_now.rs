use task_executor::{BoxError, ExecutorService, Task};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Shutdown Now Example ---");

  let executor = ExecutorService::single_thread(Handle::current(), "shutdown_now");

  // Sleeps for five seconds unless interrupted.
  let sleeper = executor
    .submit(Task::action(|token: CancellationToken| async move {
      tokio::select! {
        _ = token.cancelled() => Err::<(), BoxError>("sleep interrupted".into()),
        _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(()),
      }
    }))
    .expect("Executor rejected the task");

  // Queued behind the sleeper, never started.
  executor
    .execute(Task::action(|_| async {
      info!("This line is never printed.");
      Ok::<(), BoxError>(())
    }))
    .expect("Executor rejected the task");

  tokio::time::sleep(Duration::from_millis(100)).await;
  let not_started = executor.shutdown_now();
  info!("{} tasks not started: {:?}", not_started.len(), not_started);

  info!("Sleeper outcome: {:?}", sleeper.get().await);
  let terminated = executor.await_termination(Duration::from_secs(6)).await;
  info!("Executor terminated: {}", terminated);
  info!("--- Shutdown Now Example End ---");
}
