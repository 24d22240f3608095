use indoc::formatdoc;
use outbox_worker_job::Job;
use sqlx::{query_as, PgExecutor};

use crate::errors::Result;
use crate::store::LEASE_EXPIRED_ERROR;

pub async fn fail_expired_leases<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
) -> Result<Vec<Job>> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = 'failed',
                    last_error = $1::text,
                    locked_by = null,
                    locked_until = null
                where status = 'processing'
                and locked_until < now()
                and attempts >= max_attempts
                returning *
        "#
    );

    let jobs = query_as(&sql)
        .bind(LEASE_EXPIRED_ERROR)
        .fetch_all(executor)
        .await?;

    Ok(jobs)
}
