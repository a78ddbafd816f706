//! Read-only access to the quicklook (QL) observation-metadata database.
//!
//! Only two tables are consulted: `master` (one row per QL root, with the
//! product directory) and `ir_flt_0` (the IR `flt` primary-header values).

use std::path::Path;

use chrono::NaiveDateTime;
use psf_core::error::{PsfError, Result};
use psf_core::filters::{EXCLUDED_FILTERS, EXCLUDED_QUALITY, EXCLUDED_TARGETS, FULL_FRAME_APERTURES};
use psf_core::models::{ExposureMetadata, QlRecord};
use psf_core::reconcile::ObservationTimes;
use psf_core::time_utils::parse_db_datetime;
use rusqlite::{params, Connection, OpenFlags, Row};
use tracing::debug;

pub struct QuicklookDatabase {
    conn: Connection,
}

impl QuicklookDatabase {
    /// Open the QL database at `path` read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!("Opened QL database {}", path.display());
        Ok(Self { conn })
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| PsfError::Database(e))
    }

    /// Full-frame science exposures eligible for hst1pass.
    ///
    /// Grism and blank filters, darks and guide-star failures are excluded.
    /// `filter`, when given, restricts the result to that filter.
    pub fn ir_exposures(&self, filter: Option<&str>) -> Result<Vec<QlRecord>> {
        let mut sql = format!(
            "SELECT f.filter, m.ql_root, m.dir FROM ir_flt_0 f \
             JOIN master m ON m.id = f.master_id \
             WHERE f.aperture IN ({}) \
             AND f.filter NOT IN ({}) \
             AND f.targname NOT IN ({}) \
             AND f.quality NOT IN ({})",
            sql_list(FULL_FRAME_APERTURES),
            sql_list(EXCLUDED_FILTERS),
            sql_list(EXCLUDED_TARGETS),
            sql_list(EXCLUDED_QUALITY),
        );
        if filter.is_some() {
            sql.push_str(" AND f.filter = ?1");
        }
        sql.push_str(" ORDER BY m.ql_root");

        let mut stmt = self.conn.prepare(&sql)?;
        let map = |row: &Row| -> rusqlite::Result<QlRecord> {
            Ok(QlRecord {
                filter: row.get(0)?,
                ql_root: row.get(1)?,
                directory: row.get(2)?,
            })
        };
        let records = match filter {
            Some(f) => stmt.query_map(params![f], map)?.collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt.query_map([], map)?.collect::<rusqlite::Result<Vec<_>>>()?,
        };

        debug!("{} QL records match", records.len());
        Ok(records)
    }

    /// Metadata of the single exposure with this QL root.
    pub fn exposure_metadata(&self, ql_root: &str) -> Result<ExposureMetadata> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT f.ql_root, f.filter, f.aperture, f.expstart, f.expend, m.dir, \
             f.sunangle, f.exptime, f.fgslock, f.date_obs \
             FROM ir_flt_0 f JOIN master m ON m.id = f.master_id \
             WHERE f.ql_root = ?1",
        )?;
        let mut rows = stmt
            .query_map(params![ql_root], |row| {
                Ok(ExposureMetadata {
                    ql_root: row.get(0)?,
                    filter: row.get(1)?,
                    aperture: row.get(2)?,
                    expstart: row.get(3)?,
                    expend: row.get(4)?,
                    directory: row.get(5)?,
                    sun_angle: row.get(6)?,
                    exptime: row.get(7)?,
                    fgs_lock: row.get(8)?,
                    date_obs: get_date_obs(row, 9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| row_error(ql_root, e))?;

        if rows.len() != 1 {
            return Err(PsfError::MetadataLookup {
                ql_root: ql_root.to_string(),
                matches: rows.len(),
            });
        }
        Ok(rows.remove(0))
    }
}

impl ObservationTimes for QuicklookDatabase {
    fn observation_times(&self, ql_root: &str) -> Result<Vec<NaiveDateTime>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT date_obs FROM ir_flt_0 WHERE ql_root = ?1")?;
        let times = stmt
            .query_map(params![ql_root], |row| get_date_obs(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| row_error(ql_root, e))?;
        Ok(times)
    }
}

fn sql_list(values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Value-level failures only cost the exposure being read; anything else
/// means the store itself is unusable.
fn row_error(ql_root: &str, err: rusqlite::Error) -> PsfError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => PsfError::InvalidMetadata {
            ql_root: ql_root.to_string(),
            reason: err.to_string(),
        },
        other => PsfError::Database(other),
    }
}

fn get_date_obs(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let text: String = row.get(idx)?;
    parse_db_datetime(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid date_obs '{text}'").into(),
        )
    })
}

// ── Test fixture ──────────────────────────────────────────────────────────────

/// Create a QL database with the tables read here.
#[cfg(any(test, feature = "fixtures"))]
pub fn create_fixture(path: &Path, rows: &[FixtureRow<'_>]) -> Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE master (id INTEGER PRIMARY KEY, ql_root TEXT NOT NULL, dir TEXT NOT NULL);
         CREATE TABLE ir_flt_0 (
             id INTEGER PRIMARY KEY, master_id INTEGER NOT NULL, ql_root TEXT NOT NULL,
             filter TEXT, aperture TEXT, targname TEXT, quality TEXT,
             expstart REAL, expend REAL, sunangle REAL, exptime REAL, fgslock TEXT,
             date_obs TEXT);",
    )?;
    for (idx, r) in rows.iter().enumerate() {
        let id = idx as i64 + 1;
        conn.execute(
            "INSERT INTO master (id, ql_root, dir) VALUES (?1, ?2, ?3)",
            params![id, r.ql_root, r.dir],
        )?;
        conn.execute(
            "INSERT INTO ir_flt_0 (id, master_id, ql_root, filter, aperture, targname, quality, \
             expstart, expend, sunangle, exptime, fgslock, date_obs) \
             VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 90.0, 302.9, 'FINE', ?9)",
            params![
                id,
                r.ql_root,
                r.filter,
                r.aperture,
                r.targname,
                r.quality,
                r.expstart,
                r.expstart + 0.0035,
                r.date_obs
            ],
        )?;
    }
    Ok(())
}

/// One `master` + `ir_flt_0` row pair for [`create_fixture`].
#[cfg(any(test, feature = "fixtures"))]
#[derive(Debug, Clone, Copy)]
pub struct FixtureRow<'a> {
    pub ql_root: &'a str,
    pub dir: &'a str,
    pub filter: &'a str,
    pub aperture: &'a str,
    pub targname: &'a str,
    pub quality: &'a str,
    pub expstart: f64,
    pub date_obs: &'a str,
}

#[cfg(any(test, feature = "fixtures"))]
impl<'a> FixtureRow<'a> {
    pub fn new(ql_root: &'a str, filter: &'a str, date_obs: &'a str) -> Self {
        Self {
            ql_root,
            dir: "/ql/data",
            filter,
            aperture: "IR",
            targname: "NGC-188",
            quality: "",
            expstart: 55000.0,
            date_obs,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn fixture(rows: &[FixtureRow<'_>]) -> (TempDir, QuicklookDatabase) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ql.db");
        create_fixture(&path, rows).unwrap();
        let db = QuicklookDatabase::open(&path).unwrap();
        (tmp, db)
    }

    // ── ir_exposures ──────────────────────────────────────────────────────────

    #[test]
    fn test_ir_exposures_applies_exclusions() {
        let (_tmp, db) = fixture(&[
            FixtureRow::new("ibcf01ab", "F160W", "2010-01-01"),
            FixtureRow {
                aperture: "IR-FIX",
                ..FixtureRow::new("ibcf02ab", "F110W", "2010-01-01")
            },
            FixtureRow {
                aperture: "IRSUB256",
                ..FixtureRow::new("ibcf03ab", "F160W", "2010-01-01")
            },
            FixtureRow::new("ibcf04ab", "G141", "2010-01-01"),
            FixtureRow {
                targname: "DARK",
                ..FixtureRow::new("ibcf05ab", "F160W", "2010-01-01")
            },
            FixtureRow {
                quality: "GSFAIL",
                ..FixtureRow::new("ibcf06ab", "F160W", "2010-01-01")
            },
        ]);

        let all = db.ir_exposures(None).unwrap();
        let roots: Vec<&str> = all.iter().map(|r| r.ql_root.as_str()).collect();
        assert_eq!(roots, vec!["ibcf01ab", "ibcf02ab"]);

        let f160 = db.ir_exposures(Some("F160W")).unwrap();
        assert_eq!(f160.len(), 1);
        assert_eq!(f160[0].directory, "/ql/data");
    }

    // ── exposure_metadata ─────────────────────────────────────────────────────

    #[test]
    fn test_exposure_metadata() {
        let (_tmp, db) = fixture(&[FixtureRow::new("ibcf01ab", "F160W", "2010-01-01")]);
        let meta = db.exposure_metadata("ibcf01ab").unwrap();
        assert_eq!(meta.filter, "F160W");
        assert_eq!(meta.aperture, "IR");
        assert_eq!(meta.fgs_lock.as_deref(), Some("FINE"));
        assert!((meta.midexp() - 55000.00175).abs() < 1e-9);
        assert_eq!(
            meta.date_obs,
            NaiveDate::from_ymd_opt(2010, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_exposure_metadata_count_mismatch() {
        let (_tmp, db) = fixture(&[
            FixtureRow::new("ibcf01ab", "F160W", "2010-01-01"),
            FixtureRow::new("ibcf01ab", "F110W", "2010-01-01"),
        ]);
        assert!(matches!(
            db.exposure_metadata("ibcf01ab"),
            Err(PsfError::MetadataLookup { matches: 2, .. })
        ));
        assert!(matches!(
            db.exposure_metadata("ibcf09zz"),
            Err(PsfError::MetadataLookup { matches: 0, .. })
        ));
    }

    // ── ObservationTimes ──────────────────────────────────────────────────────

    #[test]
    fn test_observation_times() {
        let (_tmp, db) = fixture(&[FixtureRow::new("ibcf01ab", "F160W", "2010-01-01 12:30:00")]);
        let times = db.observation_times("ibcf01ab").unwrap();
        assert_eq!(times.len(), 1);
        assert!(db.observation_times("nothere0").unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_date_obs_is_per_exposure() {
        let (_tmp, db) = fixture(&[
            FixtureRow::new("ibcf01ab", "F160W", "2010-01-01"),
            FixtureRow::new("ibcf02ab", "F160W", "not-a-date"),
        ]);

        assert_eq!(db.observation_times("ibcf01ab").unwrap().len(), 1);
        let err = db.observation_times("ibcf02ab").unwrap_err();
        assert!(matches!(err, PsfError::InvalidMetadata { ref ql_root, .. } if ql_root == "ibcf02ab"));
        assert!(err.is_per_item());

        let err = db.exposure_metadata("ibcf02ab").unwrap_err();
        assert!(err.is_per_item());
    }

    #[test]
    fn test_null_metadata_column_is_per_exposure() {
        let (tmp, db) = fixture(&[FixtureRow::new("ibcf01ab", "F160W", "2010-01-01")]);
        {
            let rw = Connection::open(tmp.path().join("ql.db")).unwrap();
            rw.execute("UPDATE ir_flt_0 SET expstart = NULL, date_obs = NULL", [])
                .unwrap();
        }

        assert!(matches!(
            db.exposure_metadata("ibcf01ab"),
            Err(PsfError::InvalidMetadata { .. })
        ));
        assert!(matches!(
            db.observation_times("ibcf01ab"),
            Err(PsfError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_reconciliation_survives_unreadable_row() {
        use psf_core::reconcile::{find_new_eligible_records, ReconcilePolicy};
        use std::collections::HashSet;

        let (_tmp, db) = fixture(&[
            FixtureRow::new("ibcf01ab", "F160W", "2010-01-01"),
            FixtureRow::new("ibcf02ab", "F160W", "not-a-date"),
        ]);
        let now = NaiveDate::from_ymd_opt(2023, 6, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let local = vec!["ibcf01abq".to_string(), "ibcf02abq".to_string()];

        let outcome =
            find_new_eligible_records(&local, &HashSet::new(), &db, now, ReconcilePolicy::default())
                .unwrap();
        assert_eq!(outcome.eligible, vec!["ibcf01abq".to_string()]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "ibcf02abq");
    }

    #[test]
    fn test_open_is_read_only() {
        let (_tmp, db) = fixture(&[]);
        let err = db.conn.execute("DELETE FROM master", []).unwrap_err();
        assert!(matches!(err, rusqlite::Error::SqliteFailure(..)));
    }
}
