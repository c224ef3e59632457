use anyhow::{bail, Context, Result};
use rusqlite::{Connection, Transaction};

const CURRENT_SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => {
            tx.execute_batch(
                "CREATE TABLE session_records (
                     id TEXT PRIMARY KEY,
                     focus_level INTEGER NOT NULL,
                     duration_minutes REAL NOT NULL,
                     completed_at TEXT NOT NULL,
                     rating INTEGER,
                     notes TEXT,
                     frequency_label TEXT NOT NULL,
                     brainwave_label TEXT NOT NULL,
                     category TEXT NOT NULL
                 );

                 CREATE INDEX idx_session_records_completed_at
                     ON session_records (completed_at DESC);

                 CREATE TABLE profile (
                     id INTEGER PRIMARY KEY CHECK (id = 1),
                     current_focus_level INTEGER NOT NULL DEFAULT 1
                 );

                 INSERT INTO profile (id, current_focus_level) VALUES (1, 1);",
            )
            .context("failed to create initial schema")?;
            Ok(())
        }
        _ => bail!("unknown migration target version: {version}"),
    }
}
