use sqlx::{Postgres, Transaction};

pub mod m000001;
pub mod m000002;

/// A set of statements applied together in one transaction.
///
/// `:OUTBOX_SCHEMA` in a statement is replaced by the escaped schema name.
pub struct OutboxMigration {
    name: &'static str,
    is_breaking: bool,
    pub(crate) stmts: &'static [&'static str],
}

impl OutboxMigration {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_breaking(&self) -> bool {
        self.is_breaking
    }

    /// Numeric part of the name, `m000002` -> 2
    pub fn migration_number(&self) -> u32 {
        self.name
            .trim_start_matches('m')
            .parse()
            .unwrap_or_default()
    }

    pub async fn execute<'e>(
        &self,
        tx: &mut Transaction<'e, Postgres>,
        escaped_schema: &str,
    ) -> Result<(), sqlx::Error> {
        for stmt in self.stmts {
            let stmt = stmt.replace(":OUTBOX_SCHEMA", escaped_schema);
            sqlx::query(&stmt).execute(tx.as_mut()).await?;
        }

        Ok(())
    }
}

pub const OUTBOX_MIGRATIONS: &[OutboxMigration] =
    &[m000001::M000001_MIGRATION, m000002::M000002_MIGRATION];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_numbered_in_order() {
        let numbers: Vec<u32> = OUTBOX_MIGRATIONS
            .iter()
            .map(OutboxMigration::migration_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn statements_are_schema_qualified() {
        for migration in OUTBOX_MIGRATIONS {
            for stmt in migration.stmts {
                assert!(
                    stmt.contains(":OUTBOX_SCHEMA"),
                    "{} has an unqualified statement",
                    migration.name()
                );
            }
        }
    }
}
