use indoc::formatdoc;
use outbox_worker_job::{Job, JobId, JobStatus};
use sqlx::{query_as, PgExecutor};
use tracing::warn;

use crate::errors::Result;
use crate::store::{JobCounts, JobFilter, Page};

pub async fn get_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: JobId,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.jobs where id = $1::uuid
        "#
    );

    let job = query_as(&sql).bind(job_id).fetch_optional(executor).await?;
    Ok(job)
}

pub async fn list_jobs<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    filter: &JobFilter,
    page: Page,
) -> Result<Vec<Job>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.jobs
                where ($1::text is null or status = $1::text)
                and ($2::text is null or job_type = $2::text)
                order by created_at desc, id desc
                limit $3::bigint
                offset $4::bigint
        "#
    );

    let jobs = query_as(&sql)
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.job_type.as_deref())
        .bind(i64::from(page.limit()))
        .bind(i64::from(page.offset()))
        .fetch_all(executor)
        .await?;

    Ok(jobs)
}

pub async fn count_jobs_by_status<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
) -> Result<JobCounts> {
    let sql = formatdoc!(
        r#"
            select status, count(*) as count
                from {escaped_schema}.jobs
                group by status
        "#
    );

    let rows: Vec<(String, i64)> = query_as(&sql).fetch_all(executor).await?;

    let mut counts = JobCounts::default();
    for (status, count) in rows {
        match status.parse::<JobStatus>() {
            Ok(status) => counts.add(status, count),
            Err(e) => warn!(error = %e, count, "Ignoring jobs with unknown status"),
        }
    }
    Ok(counts)
}
