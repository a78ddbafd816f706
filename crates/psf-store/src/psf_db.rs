//! The PSF database: `psf_mast` rows and the `focus_model` series.

use std::collections::HashSet;
use std::path::Path;

use psf_core::error::{PsfError, Result};
use psf_core::focus::FocusSource;
use psf_core::models::{FocusModelRow, FocusSample, PsfRecord};
use psf_core::time_utils::{format_db_datetime, parse_db_datetime, round_mjd};
use rusqlite::{ffi, params, Connection, Row};
use tracing::{debug, info};

use crate::migrations::{recreate_psf_mast, run_migrations};

const PSF_COLUMNS: &str = "id, rootname, filter, aperture, psf_x_center, psf_y_center, \
     psf_ra, psf_dec, psf_flux, sky, qfit, pixc, midexp, mjd, date, focus, \
     exptime, sun_angle, fgs_lock";

/// Handle on the PSF database. Dropping or [`close`](Self::close)-ing it
/// releases the connection.
pub struct PsfDatabase {
    conn: Connection,
}

impl PsfDatabase {
    /// Open (creating if needed) and migrate the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(path)?;
        run_migrations(&mut conn)?;
        debug!("Opened PSF database {}", path.display());
        Ok(Self { conn })
    }

    /// A migrated in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| PsfError::Database(e))
    }

    // ── psf_mast ──────────────────────────────────────────────────────────────

    /// Insert one row. A row with the same rootname and center already
    /// present yields [`PsfError::DuplicateInsertion`].
    pub fn insert_psf_record(&self, r: &PsfRecord) -> Result<i64> {
        let result = self.conn.execute(
            "INSERT INTO psf_mast (rootname, filter, aperture, psf_x_center, psf_y_center, \
             psf_ra, psf_dec, psf_flux, sky, qfit, pixc, midexp, mjd, date, focus, \
             exptime, sun_angle, fgs_lock) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                r.rootname,
                r.filter,
                r.aperture,
                r.psf_x_center,
                r.psf_y_center,
                r.psf_ra,
                r.psf_dec,
                r.psf_flux,
                r.sky,
                r.qfit,
                r.pixc,
                round_mjd(r.midexp),
                r.mjd.map(round_mjd),
                r.date.as_ref().map(format_db_datetime),
                r.focus,
                r.exptime,
                r.sun_angle,
                r.fgs_lock,
            ],
        );
        map_duplicate(result, || {
            format!(
                "psf_mast {} ({}, {})",
                r.rootname, r.psf_x_center, r.psf_y_center
            )
        })?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Distinct rootnames with at least one `psf_mast` row.
    pub fn ingested_rootnames(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT rootname FROM psf_mast")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(names)
    }

    pub fn psf_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM psf_mast", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Every `psf_mast` row with its id, ordered by id.
    pub fn all_psf_records(&self) -> Result<Vec<(i64, PsfRecord)>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PSF_COLUMNS} FROM psf_mast ORDER BY id"))?;
        let rows = stmt
            .query_map([], row_to_psf_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Drop and recreate `psf_mast`. `focus_model` is left untouched.
    pub fn reset_psf_table(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        recreate_psf_mast(&tx)?;
        tx.commit()?;
        info!("psf_mast table reset");
        Ok(())
    }

    // ── focus_model ───────────────────────────────────────────────────────────

    /// Insert one focus measurement; the MJD is stored to five decimals.
    pub fn insert_focus_row(&self, row: &FocusModelRow) -> Result<i64> {
        let mjd = round_mjd(row.mjd);
        let result = self.conn.execute(
            "INSERT INTO focus_model (mjd, date, focus) VALUES (?1, ?2, ?3)",
            params![mjd, format_db_datetime(&row.date), row.focus],
        );
        map_duplicate(result, || format!("focus_model mjd {mjd:.5}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// MJDs already present in `focus_model`, as stored.
    pub fn focus_mjds(&self) -> Result<Vec<f64>> {
        let mut stmt = self.conn.prepare("SELECT mjd FROM focus_model ORDER BY mjd")?;
        let mjds = stmt
            .query_map([], |row| row.get::<_, f64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mjds)
    }

    pub fn focus_rows(&self) -> Result<Vec<FocusModelRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT mjd, date, focus FROM focus_model ORDER BY mjd")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FocusModelRow {
                    mjd: row.get(0)?,
                    date: get_datetime(row, 1)?,
                    focus: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl FocusSource for PsfDatabase {
    fn samples_between(&self, lo: f64, hi: f64) -> Result<Vec<FocusSample>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT mjd, focus FROM focus_model WHERE mjd >= ?1 AND mjd <= ?2 ORDER BY mjd, id",
        )?;
        let samples = stmt
            .query_map(params![lo, hi], |row| {
                Ok(FocusSample::new(row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }
}

// ── Row helpers ───────────────────────────────────────────────────────────────

/// Only a UNIQUE collision is a duplicate; other constraint failures
/// (NOT NULL, CHECK) stay database errors.
fn map_duplicate<T>(result: rusqlite::Result<T>, what: impl FnOnce() -> String) -> Result<T> {
    match result {
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(PsfError::DuplicateInsertion(what()))
        }
        other => Ok(other?),
    }
}

fn get_datetime(row: &Row, idx: usize) -> rusqlite::Result<chrono::NaiveDateTime> {
    let text: String = row.get(idx)?;
    parse_db_datetime(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid datetime '{text}'").into(),
        )
    })
}

fn row_to_psf_record(row: &Row) -> rusqlite::Result<(i64, PsfRecord)> {
    let date: Option<String> = row.get("date")?;
    let date = match date {
        Some(text) => Some(parse_db_datetime(&text).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                14,
                rusqlite::types::Type::Text,
                format!("invalid datetime '{text}'").into(),
            )
        })?),
        None => None,
    };

    Ok((
        row.get("id")?,
        PsfRecord {
            rootname: row.get("rootname")?,
            filter: row.get("filter")?,
            aperture: row.get("aperture")?,
            psf_x_center: row.get("psf_x_center")?,
            psf_y_center: row.get("psf_y_center")?,
            psf_ra: row.get("psf_ra")?,
            psf_dec: row.get("psf_dec")?,
            psf_flux: row.get("psf_flux")?,
            sky: row.get("sky")?,
            qfit: row.get("qfit")?,
            pixc: row.get("pixc")?,
            midexp: row.get("midexp")?,
            mjd: row.get("mjd")?,
            date,
            focus: row.get("focus")?,
            exptime: row.get("exptime")?,
            sun_angle: row.get("sun_angle")?,
            fgs_lock: row.get("fgs_lock")?,
        },
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use psf_core::focus::FocusWindow;
    use tempfile::TempDir;

    fn record(rootname: &str, x: f64) -> PsfRecord {
        PsfRecord {
            rootname: rootname.to_string(),
            filter: "F160W".to_string(),
            aperture: "IR".to_string(),
            psf_x_center: x,
            psf_y_center: 512.5,
            psf_ra: 150.0,
            psf_dec: 2.0,
            psf_flux: 63095.7,
            sky: 1.5,
            qfit: Some(0.04),
            pixc: None,
            midexp: 55000.25,
            mjd: Some(55000.25),
            date: NaiveDate::from_ymd_opt(2009, 6, 18)
                .unwrap()
                .and_hms_opt(6, 0, 0),
            focus: Some(-1.75),
            exptime: Some(302.9),
            sun_angle: Some(92.5),
            fgs_lock: Some("FINE".to_string()),
        }
    }

    fn focus_row(mjd: f64, focus: f64) -> FocusModelRow {
        FocusModelRow {
            mjd,
            date: NaiveDate::from_ymd_opt(2010, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            focus,
        }
    }

    // ── psf_mast ──────────────────────────────────────────────────────────────

    #[test]
    fn test_insert_and_read_back() {
        let db = PsfDatabase::open_in_memory().unwrap();
        let id = db.insert_psf_record(&record("ibcf01abq", 101.25)).unwrap();

        let rows = db.all_psf_records().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, id);
        assert_eq!(rows[0].1, record("ibcf01abq", 101.25));
    }

    #[test]
    fn test_duplicate_psf_row_is_rejected() {
        let db = PsfDatabase::open_in_memory().unwrap();
        db.insert_psf_record(&record("ibcf01abq", 101.25)).unwrap();

        let err = db.insert_psf_record(&record("ibcf01abq", 101.25)).unwrap_err();
        assert!(matches!(err, PsfError::DuplicateInsertion(_)));
        assert_eq!(db.psf_count().unwrap(), 1);

        // Same rootname, different center is a new row.
        db.insert_psf_record(&record("ibcf01abq", 200.0)).unwrap();
        assert_eq!(db.psf_count().unwrap(), 2);
    }

    #[test]
    fn test_not_null_violation_is_not_a_duplicate() {
        let db = PsfDatabase::open_in_memory().unwrap();
        let mut bad = record("ibcf01abq", 101.25);
        // SQLite stores a bound NaN as NULL.
        bad.psf_flux = f64::NAN;

        let err = db.insert_psf_record(&bad).unwrap_err();
        assert!(matches!(err, PsfError::Database(_)));
        assert!(!err.is_per_item());
        assert_eq!(db.psf_count().unwrap(), 0);
    }

    #[test]
    fn test_ingested_rootnames() {
        let db = PsfDatabase::open_in_memory().unwrap();
        db.insert_psf_record(&record("ibcf01abq", 1.0)).unwrap();
        db.insert_psf_record(&record("ibcf01abq", 2.0)).unwrap();
        db.insert_psf_record(&record("ibcf02xyq", 1.0)).unwrap();

        let names = db.ingested_rootnames().unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains("ibcf02xyq"));
    }

    #[test]
    fn test_reset_keeps_focus_model() {
        let mut db = PsfDatabase::open_in_memory().unwrap();
        db.insert_psf_record(&record("ibcf01abq", 1.0)).unwrap();
        db.insert_focus_row(&focus_row(55197.00347, -1.2)).unwrap();

        db.reset_psf_table().unwrap();
        assert_eq!(db.psf_count().unwrap(), 0);
        assert_eq!(db.focus_mjds().unwrap().len(), 1);

        // The recreated table still enforces uniqueness and has every column.
        db.insert_psf_record(&record("ibcf01abq", 1.0)).unwrap();
        assert!(db.insert_psf_record(&record("ibcf01abq", 1.0)).is_err());
        assert_eq!(db.all_psf_records().unwrap()[0].1.fgs_lock.as_deref(), Some("FINE"));
    }

    #[test]
    fn test_persists_across_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db").join("psf.sqlite");

        let db = PsfDatabase::open(&path).unwrap();
        db.insert_psf_record(&record("ibcf01abq", 1.0)).unwrap();
        db.close().unwrap();

        let db = PsfDatabase::open(&path).unwrap();
        assert_eq!(db.psf_count().unwrap(), 1);
    }

    // ── focus_model ───────────────────────────────────────────────────────────

    #[test]
    fn test_focus_rows_rounded_and_unique() {
        let db = PsfDatabase::open_in_memory().unwrap();
        db.insert_focus_row(&focus_row(55197.003471, -1.2)).unwrap();

        assert_eq!(db.focus_mjds().unwrap(), vec![55197.00347]);
        let err = db.insert_focus_row(&focus_row(55197.00347, 0.0)).unwrap_err();
        assert!(matches!(err, PsfError::DuplicateInsertion(_)));

        let rows = db.focus_rows().unwrap();
        assert_eq!(rows, vec![focus_row(55197.00347, -1.2)]);
    }

    #[test]
    fn test_focus_source_range_query() {
        let db = PsfDatabase::open_in_memory().unwrap();
        for (mjd, focus) in [(100.0, 5.0), (100.01, 7.0), (100.5, 9.0)] {
            db.insert_focus_row(&focus_row(mjd, focus)).unwrap();
        }

        let samples = db.samples_between(99.99, 100.02).unwrap();
        assert_eq!(samples.len(), 2);

        let estimate = FocusWindow::new(0.01, 0.0035)
            .unwrap()
            .estimate(100.005, &db)
            .unwrap()
            .unwrap();
        assert!((estimate.focus - 6.0).abs() < 1e-9);
    }
}
