//! Durable outbox job queue.
//!
//! Producers record side effects that must eventually happen (emails, staff
//! alerts, reminders) as rows in a job store. A [`Worker`] leases due jobs,
//! dispatches them to the handler registered for their `job_type`, and
//! records the outcome: `completed`, back to `pending` with a backoff delay,
//! or `failed` once retries are exhausted. Delivery is at-least-once, so
//! handlers must be idempotent.
//!
//! ```no_run
//! use outbox_worker::{JobSpec, TaskError, WorkerOptions};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let worker = WorkerOptions::default()
//!     .database_url("postgres://localhost/shop")
//!     .define_raw_job("send_offer_email", |ctx| async move {
//!         let contact_id = ctx.payload()["contact_id"]
//!             .as_str()
//!             .ok_or_else(|| TaskError::fatal("missing contact_id"))?;
//!         println!("sending offer to {contact_id}");
//!         Ok::<(), TaskError>(())
//!     })
//!     .init()
//!     .await?;
//!
//! worker
//!     .create_utils()
//!     .add_raw_job("send_offer_email", json!({ "contact_id": "C1" }), JobSpec::default())
//!     .await?;
//! worker.run().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod builder;
pub mod errors;
pub mod job_spec;
pub mod producers;
pub mod runner;
mod shutdown;
mod sql;
pub mod store;
pub mod streams;
mod utils;
pub mod worker_utils;

pub use crate::backoff::BackoffPolicy;
pub use crate::builder::{WorkerBuildError, WorkerOptions};
pub use crate::errors::{OutboxError, Result};
pub use crate::job_spec::{JobSpec, JobSpecBuilder};
pub use crate::runner::{ProcessJobError, ReleaseJobError, Worker, WorkerFn};
pub use crate::store::{
    InsertedJob, JobCounts, JobFilter, JobStore, MemoryJobStore, Page, PgJobStore,
    LEASE_EXPIRED_ERROR,
};
pub use crate::worker_utils::WorkerUtils;

pub use outbox_worker_ctx::{Extensions, WorkerContext};
pub use outbox_worker_job::{Job, JobId, JobStatus, ParseJobStatusError, DEFAULT_MAX_ATTEMPTS};
pub use outbox_worker_migrations::MigrateError;
pub use outbox_worker_task_handler::{IntoTaskHandlerResult, RunTaskError, TaskError, TaskHandler};
