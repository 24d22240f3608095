use indoc::indoc;

use super::OutboxMigration;

pub const M000002_MIGRATION: OutboxMigration = OutboxMigration {
    name: "m000002",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create function :OUTBOX_SCHEMA.tg_jobs__guard_update() returns trigger
            language plpgsql
            as $$
            begin
                if new.payload is distinct from old.payload then
                    raise exception 'job % payload is immutable', old.id
                        using errcode = 'check_violation';
                end if;
                if old.status = 'completed' and new.status <> 'completed' then
                    raise exception 'job % is completed and cannot change status', old.id
                        using errcode = 'check_violation';
                end if;
                new.updated_at := now();
                return new;
            end;
            $$;
        "#},
        indoc! {r#"
            create trigger _100_guard_update
                before update on :OUTBOX_SCHEMA.jobs
                for each row
                execute procedure :OUTBOX_SCHEMA.tg_jobs__guard_update();
        "#},
    ],
};
