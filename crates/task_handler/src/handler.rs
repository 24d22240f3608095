use std::future::Future;

use outbox_worker_ctx::WorkerContext;
use serde::{de::DeserializeOwned, Serialize};

use crate::TaskError;

/// Conversion of a handler's return value into the dispatcher's outcome.
///
/// Implemented for `()` and for `Result<(), E>` where `E: Into<TaskError>`.
pub trait IntoTaskHandlerResult {
    fn into_task_handler_result(self) -> Result<(), TaskError>;
}

impl IntoTaskHandlerResult for () {
    fn into_task_handler_result(self) -> Result<(), TaskError> {
        Ok(())
    }
}

impl<E: Into<TaskError>> IntoTaskHandlerResult for Result<(), E> {
    fn into_task_handler_result(self) -> Result<(), TaskError> {
        self.map_err(Into::into)
    }
}

/// A job type together with its handler.
///
/// The implementing type is the payload: it is deserialized from the job's
/// JSON payload and consumed by `run`. Handlers may be invoked more than once
/// for the same job and must be idempotent.
///
/// ```
/// use outbox_worker_ctx::WorkerContext;
/// use outbox_worker_task_handler::{IntoTaskHandlerResult, TaskError, TaskHandler};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize, Serialize)]
/// struct SendOfferEmail {
///     contact_id: String,
/// }
///
/// impl TaskHandler for SendOfferEmail {
///     const IDENTIFIER: &'static str = "send_offer_email";
///
///     async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
///         if self.contact_id.is_empty() {
///             return Err(TaskError::fatal("missing contact"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait TaskHandler: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The `job_type` this handler is registered under
    const IDENTIFIER: &'static str;

    fn run(self, ctx: WorkerContext) -> impl Future<Output = impl IntoTaskHandlerResult> + Send;
}

/// Deserializes the context payload into `T` and runs it.
pub async fn run_task_from_worker_ctx<T: TaskHandler>(ctx: WorkerContext) -> Result<(), TaskError> {
    let payload = serde_json::from_value::<T>(ctx.payload().clone())?;
    payload.run(ctx).await.into_task_handler_result()
}
