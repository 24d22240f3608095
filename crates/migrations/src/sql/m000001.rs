use indoc::indoc;

use super::OutboxMigration;

pub const M000001_MIGRATION: OutboxMigration = OutboxMigration {
    name: "m000001",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create table :OUTBOX_SCHEMA.jobs (
                id uuid primary key,
                job_type text not null check (length(job_type) > 0),
                payload jsonb not null default '{}'::jsonb,
                status text not null default 'pending'
                    check (status in ('pending', 'processing', 'completed', 'failed')),
                attempts int not null default 0 check (attempts >= 0),
                max_attempts int not null default 3 check (max_attempts >= 1),
                scheduled_for timestamptz not null default now(),
                locked_until timestamptz,
                locked_by text,
                last_error text,
                key text unique,
                created_at timestamptz not null default now(),
                updated_at timestamptz not null default now(),
                completed_at timestamptz,
                constraint jobs_processing_is_locked
                    check (status <> 'processing' or (locked_until is not null and locked_by is not null)),
                constraint jobs_completed_has_timestamp
                    check (status <> 'completed' or completed_at is not null)
            );
        "#},
        indoc! {r#"
            create index jobs_status_scheduled_for_idx
                on :OUTBOX_SCHEMA.jobs (status, scheduled_for)
                where status in ('pending', 'processing');
        "#},
        indoc! {r#"
            create index jobs_created_at_idx
                on :OUTBOX_SCHEMA.jobs (created_at desc, id desc);
        "#},
        indoc! {r#"
            create index jobs_job_type_idx
                on :OUTBOX_SCHEMA.jobs (job_type);
        "#},
    ],
};
