//! Forward-only schema steps, tracked in `PRAGMA user_version`.
//!
//! Each step runs in its own transaction together with the version bump, so
//! a crash mid-upgrade leaves the file at the last completed step.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Ordered upgrade steps. Entry `n` takes a database from `n - 1` to `n`.
const STEPS: &[(u32, &str)] = &[(1, schema::SCHEMA_V1)];

fn user_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring `conn` up to [`SCHEMA_VERSION`], applying only the missing steps.
pub fn run(conn: &Connection) -> Result<()> {
    let found = user_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "file is at schema v{found}, this build only understands up to v{SCHEMA_VERSION}"
        )));
    }

    for &(target, ddl) in STEPS.iter().filter(|(v, _)| *v > found) {
        tracing::info!(from = target - 1, to = target, "applying storage schema step");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(ddl)?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
    }

    let reached = user_version(conn)?;
    if reached != SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "no upgrade step reaches v{SCHEMA_VERSION} (stopped at v{reached})"
        )));
    }
    Ok(())
}
