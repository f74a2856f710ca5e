use task_executor::{BoxError, ExecutorError, ExecutorService, Task};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Check Results Example ---");

  let executor = ExecutorService::single_thread(Handle::current(), "check_results");
  let counter = Arc::new(AtomicUsize::new(0));

  let task_counter = counter.clone();
  let handle = executor
    .submit(Task::action(move |_| async move {
      for _ in 0..500 {
        task_counter.fetch_add(1, Ordering::SeqCst);
      }
      Ok::<(), BoxError>(())
    }))
    .expect("Executor rejected the task");

  match handle.get_timeout(Duration::from_secs(10)).await {
    Ok(()) => info!("Reached! Counter is {}", counter.load(Ordering::SeqCst)),
    Err(ExecutorError::TimedOut) => info!("Not reached in time"),
    Err(e) => info!("Task failed: {}", e),
  }

  let results = executor
    .invoke_all((2..=4).map(|i| Task::computation(move |_| async move { Ok::<_, BoxError>(format!("Callable-task-{}", i)) })))
    .await
    .expect("invoke_all rejected");
  for handle in results {
    info!("invoke_all result: {:?}", handle.get().await);
  }

  match executor
    .invoke_any(vec![
      Task::computation(|_| async { Ok::<_, BoxError>("Callable-task-6".to_string()) }),
      Task::computation(|_| async { Ok::<_, BoxError>("Callable-task-7".to_string()) }),
    ])
    .await
  {
    Ok(winner) => info!("invoke_any winner: {}", winner),
    Err(e) => info!("invoke_any failed: {}", e),
  }

  executor.shutdown();
  let terminated = executor.await_termination(Duration::from_secs(1)).await;
  info!("Executor terminated: {}", terminated);
  info!("--- Check Results Example End ---");
}
