//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "threads_and_settings",
        sql: r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                relationship_stage TEXT NOT NULL,
                archived INTEGER NOT NULL DEFAULT 0,
                last_activity_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_threads_last_activity ON threads(last_activity_at);

            CREATE TABLE IF NOT EXISTS company_settings (
                user_id TEXT PRIMARY KEY,
                settings TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "approval_decisions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS approval_decisions (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                disposition TEXT NOT NULL,
                reply_content TEXT NOT NULL,
                pattern_type TEXT,
                decided_at TEXT NOT NULL,
                deadline TEXT,
                closed_by TEXT,
                reason TEXT,
                policy TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_decisions_thread ON approval_decisions(thread_id);
            CREATE INDEX IF NOT EXISTS idx_decisions_disposition ON approval_decisions(disposition);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_decisions_one_pending
                ON approval_decisions(thread_id) WHERE disposition = 'pending_approval';
        "#,
    },
    Migration {
        version: 3,
        name: "orchestration_audit",
        sql: r#"
            CREATE TABLE IF NOT EXISTS orchestration_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                processing_type TEXT NOT NULL,
                result TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_audit_thread ON orchestration_audit(thread_id);
        "#,
    },
];

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
pub async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("Failed to parse migration version: {e}"))),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_apply_and_are_idempotent() {
        let conn = memory_conn().await;
        run_migrations(&conn).await.unwrap();
        let v1 = get_current_version(&conn).await.unwrap();
        assert_eq!(v1, MIGRATIONS.last().unwrap().version);

        run_migrations(&conn).await.unwrap();
        assert_eq!(get_current_version(&conn).await.unwrap(), v1);
    }

    #[tokio::test]
    async fn one_pending_decision_per_thread_is_enforced() {
        let conn = memory_conn().await;
        run_migrations(&conn).await.unwrap();

        let insert = "INSERT INTO approval_decisions
            (id, thread_id, disposition, reply_content, decided_at, policy, created_at)
            VALUES (?1, 't-1', 'pending_approval', 'x', '2026-01-01T00:00:00Z', '{}', '2026-01-01T00:00:00Z')";
        conn.execute(insert, libsql::params!["a"]).await.unwrap();
        assert!(conn.execute(insert, libsql::params!["b"]).await.is_err());
    }
}
