use indoc::formatdoc;
use outbox_worker_job::{Job, JobId};
use sqlx::{query_as, PgExecutor};

use crate::errors::Result;

/// `failed -> pending`, due now. `None` if the job is missing or not failed.
pub async fn retry_failed_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: JobId,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = 'pending',
                    scheduled_for = now(),
                    locked_by = null,
                    locked_until = null
                where id = $1::uuid
                and status = 'failed'
                returning *
        "#
    );

    let job = query_as(&sql)
        .bind(job_id)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}
