use std::time::Duration;

use indoc::formatdoc;
use outbox_worker_job::Job;
use sqlx::{query_as, PgExecutor};

use super::duration_to_millis;
use crate::errors::Result;

/// Claims up to `limit` runnable jobs for `worker_id`.
///
/// `skip locked` keeps concurrent leasers off each other's candidates, and the
/// update re-checks the row state so a row that changed in between is skipped.
#[tracing::instrument(skip_all, err, fields(db.system = "postgresql"))]
pub async fn lease_jobs<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    worker_id: &str,
    limit: usize,
    lease_duration: Duration,
) -> Result<Vec<Job>> {
    let sql = formatdoc!(
        r#"
            with candidates as (
                select jobs.id
                    from {escaped_schema}.jobs as jobs
                    where jobs.scheduled_for <= now()
                    and (
                        (jobs.status = 'pending' and (jobs.locked_until is null or jobs.locked_until < now()))
                        or
                        (jobs.status = 'processing' and jobs.locked_until < now() and jobs.attempts < jobs.max_attempts)
                    )
                    order by jobs.scheduled_for asc, jobs.id asc
                    limit $2::bigint
                    for update
                    skip locked
            )
            update {escaped_schema}.jobs as jobs
                set
                    status = 'processing',
                    attempts = jobs.attempts + 1,
                    locked_by = $1::text,
                    locked_until = now() + ($3::bigint * interval '1 millisecond')
                from candidates
                where jobs.id = candidates.id
                and (
                    jobs.status = 'pending'
                    or (jobs.status = 'processing' and jobs.locked_until < now())
                )
                returning jobs.*
        "#
    );

    let jobs = query_as(&sql)
        .bind(worker_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(duration_to_millis(lease_duration))
        .fetch_all(executor)
        .await?;

    Ok(jobs)
}
