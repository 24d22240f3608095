use std::time::Duration;

use indoc::formatdoc;
use outbox_worker_job::{Job, JobId};
use sqlx::{query_as, PgExecutor};

use super::duration_to_millis;
use crate::errors::Result;

// Every release is keyed on `locked_by`: a worker whose lease was reclaimed
// updates nothing and gets `None` back.

#[tracing::instrument(skip_all, err, fields(db.system = "postgresql"))]
pub async fn complete_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: JobId,
    worker_id: &str,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = 'completed',
                    completed_at = now(),
                    locked_by = null,
                    locked_until = null
                where id = $1::uuid
                and status = 'processing'
                and locked_by = $2::text
                returning *
        "#
    );

    let job = query_as(&sql)
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}

#[tracing::instrument(skip_all, err, fields(db.system = "postgresql"))]
pub async fn reschedule_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: JobId,
    worker_id: &str,
    error: &str,
    delay: Duration,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = 'pending',
                    last_error = $3::text,
                    scheduled_for = now() + ($4::bigint * interval '1 millisecond'),
                    locked_by = null,
                    locked_until = null
                where id = $1::uuid
                and status = 'processing'
                and locked_by = $2::text
                returning *
        "#
    );

    let job = query_as(&sql)
        .bind(job_id)
        .bind(worker_id)
        .bind(error)
        .bind(duration_to_millis(delay))
        .fetch_optional(executor)
        .await?;

    Ok(job)
}

#[tracing::instrument(skip_all, err, fields(db.system = "postgresql"))]
pub async fn fail_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: JobId,
    worker_id: &str,
    error: &str,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = 'failed',
                    last_error = $3::text,
                    locked_by = null,
                    locked_until = null
                where id = $1::uuid
                and status = 'processing'
                and locked_by = $2::text
                returning *
        "#
    );

    let job = query_as(&sql)
        .bind(job_id)
        .bind(worker_id)
        .bind(error)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}
