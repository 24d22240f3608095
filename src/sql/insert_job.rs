use indoc::formatdoc;
use outbox_worker_job::Job;
use serde_json::Value;
use sqlx::{query_as, FromRow, PgExecutor};
use uuid::Uuid;

use crate::errors::Result;
use crate::store::InsertedJob;
use crate::JobSpec;

#[derive(FromRow)]
struct InsertedRow {
    #[sqlx(flatten)]
    job: Job,
    created: bool,
}

impl From<InsertedRow> for InsertedJob {
    fn from(row: InsertedRow) -> Self {
        if row.created {
            InsertedJob::Created(row.job)
        } else {
            InsertedJob::Existing(row.job)
        }
    }
}

/// Inserts a pending job, falling back to the row that already owns the key.
///
/// Returns `None` only when a concurrent insert took the key but is not
/// visible to this statement yet; the caller should read the key again.
#[tracing::instrument(skip_all, err, fields(db.system = "postgresql"))]
pub async fn insert_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_type: &str,
    payload: &Value,
    spec: &JobSpec,
) -> Result<Option<InsertedJob>> {
    let sql = formatdoc!(
        r#"
            with inserted as (
                insert into {escaped_schema}.jobs (id, job_type, payload, max_attempts, scheduled_for, key)
                    values (
                        $1::uuid,
                        $2::text,
                        $3::jsonb,
                        coalesce($4::int, 3),
                        coalesce($5::timestamptz, now()),
                        $6::text
                    )
                    on conflict (key) do nothing
                    returning *
            )
            select inserted.*, true as created from inserted
            union all
            select jobs.*, false as created
                from {escaped_schema}.jobs as jobs
                where $6::text is not null
                and jobs.key = $6::text
                and not exists (select 1 from inserted)
        "#
    );

    let row: Option<InsertedRow> = query_as(&sql)
        .bind(Uuid::now_v7())
        .bind(job_type)
        .bind(payload)
        .bind(*spec.max_attempts())
        .bind(*spec.scheduled_for())
        .bind(spec.job_key().as_deref())
        .fetch_optional(executor)
        .await?;

    Ok(row.map(InsertedJob::from))
}

pub async fn get_job_by_key<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_key: &str,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.jobs where key = $1::text
        "#
    );

    let job = query_as(&sql).bind(job_key).fetch_optional(executor).await?;
    Ok(job)
}
