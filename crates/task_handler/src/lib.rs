mod handler;
mod task_error;
mod task_result;

pub use handler::{run_task_from_worker_ctx, IntoTaskHandlerResult, TaskHandler};
pub use task_error::TaskError;
pub use task_result::{spawn_task, RunTaskError, SpawnTaskResult};
