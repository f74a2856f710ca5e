use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// The error type a task body may fail with.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a task body did not produce a value.
#[derive(Error, Debug, Clone)]
pub enum TaskFailure {
  /// The body returned an `Err`.
  #[error("{0}")]
  Error(Arc<dyn StdError + Send + Sync + 'static>),
  /// The body panicked. Holds the panic message when it was a string.
  #[error("task panicked: {0}")]
  Panicked(String),
}

impl TaskFailure {
  pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "<non-string panic payload>".to_string()
    };
    TaskFailure::Panicked(message)
  }

  /// Returns the underlying error if the body returned one.
  pub fn as_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
    match self {
      TaskFailure::Error(e) => Some(e.as_ref()),
      TaskFailure::Panicked(_) => None,
    }
  }
}

impl From<BoxError> for TaskFailure {
  fn from(err: BoxError) -> Self {
    TaskFailure::Error(Arc::from(err))
  }
}

/// Errors surfaced by the executor and its result handles.
#[derive(Error, Debug, Clone)]
pub enum ExecutorError {
  #[error("Executor is shutting down or terminated, task rejected")]
  Rejected,

  #[error("Task failed: {0}")]
  ExecutionFailure(TaskFailure),

  #[error("Task was cancelled")]
  Cancelled,

  #[error("Timed out waiting for task outcome")]
  TimedOut,

  #[error("All {} tasks failed", .0.len())]
  AggregateFailure(Vec<ExecutorError>),

  #[error("No tasks were given to invoke_any")]
  NoTasks,
}

impl ExecutorError {
  /// Returns the task failure if this is an `ExecutionFailure`.
  pub fn failure(&self) -> Option<&TaskFailure> {
    match self {
      ExecutorError::ExecutionFailure(f) => Some(f),
      _ => None,
    }
  }
}
