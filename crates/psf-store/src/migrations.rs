use psf_core::error::{PsfError, Result};
use rusqlite::{Connection, Transaction};
use tracing::info;

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

const SCHEMA_V1: &str = include_str!("schemas/psf_v1.sql");
const SCHEMA_V2: &str = include_str!("schemas/psf_v2.sql");

/// Bring the PSF database up to [`CURRENT_SCHEMA_VERSION`].
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(PsfError::Config(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        info!("Applied PSF schema version {next_version}");
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Drop `psf_mast` and create it again at the current schema version.
pub(crate) fn recreate_psf_mast(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch("DROP TABLE IF EXISTS psf_mast;")?;
    for version in 1..=CURRENT_SCHEMA_VERSION {
        apply_migration(tx, version)?;
    }
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => tx.execute_batch(SCHEMA_V1)?,
        2 => tx.execute_batch(SCHEMA_V2)?,
        _ => {
            return Err(PsfError::Config(format!(
                "unknown migration target version: {version}"
            )))
        }
    }
    Ok(())
}
