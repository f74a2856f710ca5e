use task_executor::{BoxError, ExecutorError, ExecutorService, Task, TaskState};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, util::SubscriberInitExt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,task_executor=debug"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .finish()
      .try_init()
      .ok();
  });
}

// Returns `value` after `delay_ms`, stopping early with an error if interrupted.
fn delayed_value(value: &'static str, delay_ms: u64) -> Task<String> {
  Task::computation(move |token: CancellationToken| async move {
    tokio::select! {
      _ = token.cancelled() => Err::<String, BoxError>(format!("{} interrupted", value).into()),
      _ = sleep(Duration::from_millis(delay_ms)) => Ok(value.to_string()),
    }
  })
}

fn delayed_failure(message: &'static str, delay_ms: u64) -> Task<String> {
  Task::computation(move |_| async move {
    sleep(Duration::from_millis(delay_ms)).await;
    Err::<String, BoxError>(message.into())
  })
}

#[tokio::test]
async fn test_invoke_all_preserves_input_order() {
  setup_tracing_for_test();
  let executor = ExecutorService::new(3, tokio::runtime::Handle::current(), "test_batch_invoke_all_order");

  // The first task finishes last.
  let tasks = vec![
    delayed_value("T1", 120),
    delayed_value("T2", 60),
    delayed_value("T3", 10),
  ];
  let handles = executor.invoke_all(tasks).await.unwrap();

  assert_eq!(handles.len(), 3);
  assert!(handles.iter().all(|handle| handle.is_done()));
  let values: Vec<String> = handles.iter().map(|handle| handle.try_get().unwrap().unwrap()).collect();
  assert_eq!(values, vec!["T1", "T2", "T3"]);

  executor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invoke_all_with_random_durations() {
  setup_tracing_for_test();
  let executor = ExecutorService::new(4, tokio::runtime::Handle::current(), "test_batch_invoke_all_random");

  let tasks: Vec<Task<usize>> = {
    let mut rng = rand::rng();
    (0..12usize)
      .map(|i| {
        let delay = rng.random_range(1..40u64);
        Task::computation(move |_| async move {
          sleep(Duration::from_millis(delay)).await;
          Ok::<usize, BoxError>(i)
        })
      })
      .collect()
  };

  let handles = executor.invoke_all(tasks).await.unwrap();
  for (i, handle) in handles.iter().enumerate() {
    assert_eq!(handle.get().await.unwrap(), i);
  }

  executor.shutdown();
  assert!(executor.await_termination(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_invoke_all_does_not_short_circuit_on_failure() {
  setup_tracing_for_test();
  let executor = ExecutorService::single_thread(tokio::runtime::Handle::current(), "test_batch_invoke_all_failure");

  let handles = executor
    .invoke_all(vec![
      delayed_value("ok_before", 5),
      delayed_failure("middle failed", 5),
      delayed_value("ok_after", 5),
    ])
    .await
    .unwrap();

  assert_eq!(handles[0].get().await.unwrap(), "ok_before");
  assert_eq!(handles[1].state(), TaskState::Failed);
  assert!(matches!(handles[1].get().await, Err(ExecutorError::ExecutionFailure(_))));
  assert_eq!(handles[2].get().await.unwrap(), "ok_after");

  executor.shutdown();
}

#[tokio::test]
async fn test_invoke_all_empty_batch() {
  setup_tracing_for_test();
  let executor = ExecutorService::single_thread(tokio::runtime::Handle::current(), "test_batch_invoke_all_empty");
  let handles = executor.invoke_all(Vec::<Task<String>>::new()).await.unwrap();
  assert!(handles.is_empty());
  executor.shutdown();
}

#[tokio::test]
async fn test_invoke_all_timeout_cancels_stragglers() {
  setup_tracing_for_test();
  let executor = ExecutorService::new(2, tokio::runtime::Handle::current(), "test_batch_invoke_all_timeout");

  let handles = executor
    .invoke_all_timeout(
      vec![delayed_value("fast", 10), delayed_value("slow", 5000)],
      Duration::from_millis(100),
    )
    .await
    .unwrap();

  assert_eq!(handles[0].get().await.unwrap(), "fast");
  assert!(handles[1].is_cancellation_requested());
  assert!(matches!(handles[1].get().await, Err(ExecutorError::Cancelled)));

  executor.shutdown();
  assert!(executor.await_termination(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_invoke_all_timeout_with_unbounded_timeout() {
  setup_tracing_for_test();
  let executor = ExecutorService::single_thread(tokio::runtime::Handle::current(), "test_batch_invoke_all_max_timeout");

  let handles = executor
    .invoke_all_timeout(
      vec![Task::computation(|_| async { Ok::<_, BoxError>(1) }), Task::computation(|_| async { Ok::<_, BoxError>(2) })],
      Duration::MAX,
    )
    .await
    .unwrap();

  let values: Vec<i32> = handles.iter().map(|handle| handle.try_get().unwrap().unwrap()).collect();
  assert_eq!(values, vec![1, 2]);

  executor.shutdown();
  assert!(executor.await_termination(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_invoke_any_returns_exactly_one_success() {
  setup_tracing_for_test();
  let executor = ExecutorService::new(2, tokio::runtime::Handle::current(), "test_batch_invoke_any_success");

  let value = executor
    .invoke_any(vec![delayed_value("T1", 20), delayed_value("T2", 20)])
    .await
    .unwrap();
  assert!(value == "T1" || value == "T2", "Unexpected winner {}", value);

  executor.shutdown();
}

#[tokio::test]
async fn test_invoke_any_with_duplicate_bodies() {
  setup_tracing_for_test();
  let executor = ExecutorService::single_thread(tokio::runtime::Handle::current(), "test_batch_invoke_any_dupes");

  let value = executor
    .invoke_any(vec![
      delayed_value("task-6", 0),
      delayed_value("task-7", 0),
      delayed_value("task-7", 0),
    ])
    .await
    .unwrap();
  // One worker: the first queued task is the first to complete.
  assert_eq!(value, "task-6");

  executor.shutdown();
}

#[tokio::test]
async fn test_invoke_any_cancels_losers() {
  setup_tracing_for_test();
  let executor = ExecutorService::new(2, tokio::runtime::Handle::current(), "test_batch_invoke_any_losers");
  let slow_finished = Arc::new(AtomicUsize::new(0));

  let flag = slow_finished.clone();
  let slow = Task::computation(move |token: CancellationToken| async move {
    tokio::select! {
      _ = token.cancelled() => Err::<String, BoxError>("slow interrupted".into()),
      _ = sleep(Duration::from_secs(5)) => {
        flag.fetch_add(1, Ordering::SeqCst);
        Ok("slow".to_string())
      }
    }
  });

  let value = executor
    .invoke_any(vec![slow, delayed_value("quick", 10)])
    .await
    .unwrap();
  assert_eq!(value, "quick");

  executor.shutdown();
  assert!(executor.await_termination(Duration::from_secs(1)).await);
  assert_eq!(slow_finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invoke_any_skips_failures_until_success() {
  setup_tracing_for_test();
  let executor = ExecutorService::new(2, tokio::runtime::Handle::current(), "test_batch_invoke_any_mixed");

  let value = executor
    .invoke_any(vec![delayed_failure("early failure", 5), delayed_value("late success", 40)])
    .await
    .unwrap();
  assert_eq!(value, "late success");

  executor.shutdown();
}

#[tokio::test]
async fn test_invoke_any_all_failures_aggregate() {
  setup_tracing_for_test();
  let executor = ExecutorService::new(2, tokio::runtime::Handle::current(), "test_batch_invoke_any_all_fail");

  let result = executor
    .invoke_any(vec![delayed_failure("first", 30), delayed_failure("second", 5)])
    .await;

  match result {
    Err(ExecutorError::AggregateFailure(errors)) => {
      assert_eq!(errors.len(), 2);
      let messages: Vec<String> = errors
        .iter()
        .map(|err| err.failure().map(|f| f.to_string()).unwrap_or_default())
        .collect();
      assert_eq!(messages, vec!["first", "second"], "Errors are reported in input order");
    }
    other => panic!("Expected AggregateFailure, got {:?}", other),
  }

  executor.shutdown();
}

#[tokio::test]
async fn test_invoke_any_empty_batch() {
  setup_tracing_for_test();
  let executor = ExecutorService::single_thread(tokio::runtime::Handle::current(), "test_batch_invoke_any_empty");
  let result = executor.invoke_any(Vec::<Task<String>>::new()).await;
  assert!(matches!(result, Err(ExecutorError::NoTasks)));
  executor.shutdown();
}

#[tokio::test]
async fn test_invoke_any_timeout() {
  setup_tracing_for_test();
  let executor = ExecutorService::single_thread(tokio::runtime::Handle::current(), "test_batch_invoke_any_timeout");

  let result = executor
    .invoke_any_timeout(vec![delayed_value("too slow", 5000)], Duration::from_millis(50))
    .await;
  assert!(matches!(result, Err(ExecutorError::TimedOut)));

  executor.shutdown();
  assert!(executor.await_termination(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_batches_rejected_after_shutdown() {
  setup_tracing_for_test();
  let executor = ExecutorService::single_thread(tokio::runtime::Handle::current(), "test_batch_rejected");
  executor.shutdown();

  let all = executor.invoke_all(vec![delayed_value("late", 1)]).await;
  assert!(matches!(all, Err(ExecutorError::Rejected)));
  let any = executor.invoke_any(vec![delayed_value("late", 1)]).await;
  assert!(matches!(any, Err(ExecutorError::Rejected)));
}
