use indoc::formatdoc;
use sqlx::{query, PgExecutor, Row};

use crate::MigrateError;

/// Oldest supported server, as `server_version_num`
pub const MIN_PG_VERSION_NUM: u32 = 120000;

/// Reads `server_version_num` and checks that the server is recent enough.
pub async fn fetch_and_check_postgres_version<'e, E>(executor: E) -> Result<u32, MigrateError>
where
    E: PgExecutor<'e>,
{
    let sql = formatdoc!(
        r#"
            select current_setting('server_version_num') as server_version_num
        "#
    );

    let row = query(&sql).fetch_one(executor).await?;
    let version_string: String = row.try_get("server_version_num")?;

    check_postgres_version(&version_string)
}

pub fn check_postgres_version(version_string: &str) -> Result<u32, MigrateError> {
    let version = version_string.trim().parse::<u32>()?;

    if version < MIN_PG_VERSION_NUM {
        return Err(MigrateError::IncompatibleVersion(version));
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_supported_versions() {
        for raw in ["120000", "120999", "130004", "160002", " 170000 "] {
            let version = check_postgres_version(raw).unwrap();
            assert!(version >= MIN_PG_VERSION_NUM);
        }
    }

    #[test]
    fn rejects_old_or_garbage_versions() {
        assert!(matches!(
            check_postgres_version("119999"),
            Err(MigrateError::IncompatibleVersion(119999))
        ));
        assert!(matches!(
            check_postgres_version("96000"),
            Err(MigrateError::IncompatibleVersion(96000))
        ));
        assert!(matches!(
            check_postgres_version("sixteen"),
            Err(MigrateError::ParseVersionError(_))
        ));
    }
}
