//! A Tokio-based executor service: a fixed pool of workers, result handles,
//! invoke-all/invoke-any batches, and graceful or forceful shutdown with
//! cooperative cancellation.

mod batch;
mod error;
mod executor;
mod handle;
mod shutdown;
mod task;
mod task_queue;
mod worker;

pub use error::{BoxError, ExecutorError, TaskFailure};
pub use executor::ExecutorService;
pub use handle::{ResultHandle, TaskState};
pub use shutdown::ShutdownState;
pub use task::{NotStartedTask, Task, TaskFuture, TaskId, TaskKind};
