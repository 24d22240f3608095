pub mod expire_leases;
pub mod insert_job;
pub mod lease_jobs;
pub mod query_jobs;
pub mod release_job;
pub mod retry_job;

use std::time::Duration;

/// Milliseconds for a `$n::bigint * interval '1 millisecond'` bind.
pub(crate) fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
