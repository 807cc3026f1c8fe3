//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register schema migrations in strictly increasing order.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - A failing migration leaves `user_version` where it was.

use crate::db::{DbError, DbResult};
use log::{info, warn};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("0001_init.sql"),
}];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    apply_registered(conn, MIGRATIONS)
}

fn apply_registered(conn: &mut Connection, migrations: &[Migration]) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    let latest = migrations.last().map_or(0, |migration| migration.version);

    if current_version > latest {
        return Err(DbError::SchemaTooNew {
            found: current_version,
            supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in migrations
        .iter()
        .filter(|migration| migration.version > current_version)
    {
        tx.execute_batch(migration.sql)
            .and_then(|()| {
                tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))
            })
            .map_err(|source| {
                warn!(
                    "event=db_migrate module=db status=error version={} error={source}",
                    migration.version
                );
                DbError::Migration {
                    version: migration.version,
                    source,
                }
            })?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        current_version, latest
    );
    Ok(())
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::{apply_registered, current_user_version, Migration};
    use crate::db::DbError;
    use rusqlite::Connection;

    const BROKEN: &[Migration] = &[
        Migration {
            version: 1,
            sql: "CREATE TABLE notes (uuid TEXT PRIMARY KEY);",
        },
        Migration {
            version: 2,
            sql: "ALTER TABLE missing_table ADD COLUMN title TEXT;",
        },
    ];

    #[test]
    fn failed_migration_reports_version_and_rolls_back() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");

        let err = apply_registered(&mut conn, BROKEN).expect_err("second migration must fail");
        match &err {
            DbError::Migration { version, .. } => assert_eq!(*version, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retryable());
        assert!(err.to_string().contains("migration 2"));

        assert_eq!(current_user_version(&conn).expect("read version"), 0);
        let notes_exists: i64 = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'notes');",
                [],
                |row| row.get(0),
            )
            .expect("query sqlite_master");
        assert_eq!(notes_exists, 0);
    }

    #[test]
    fn newer_schema_is_not_retryable() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA user_version = 7;")
            .expect("set version");

        let err = apply_registered(&mut conn, BROKEN).expect_err("newer schema must fail");
        assert!(matches!(err, DbError::SchemaTooNew { found: 7, supported: 2 }));
        assert!(!err.is_retryable());
    }
}
