//! Focus-model ingestion: `*Focus*.txt` files into `focus_model`.

use std::collections::HashSet;
use std::path::Path;

use psf_core::error::{PsfError, Result};
use psf_core::time_utils::round_mjd;
use psf_data::discovery::find_focus_files;
use psf_data::focus_file::read_focus_file;
use psf_store::PsfDatabase;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FocusIngestSummary {
    pub files: usize,
    pub rows_read: usize,
    pub already_present: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Insert every focus measurement under `focus_dir` whose MJD is not yet
/// in the database. Unreadable files are logged and skipped.
pub fn ingest_focus_models(db: &PsfDatabase, focus_dir: &Path) -> Result<FocusIngestSummary> {
    let files = find_focus_files(focus_dir);
    info!("{} focus model files in {}", files.len(), focus_dir.display());

    // Compare on the stored five-decimal key.
    let mut known: HashSet<i64> = db.focus_mjds()?.into_iter().map(mjd_key).collect();
    let mut summary = FocusIngestSummary {
        files: files.len(),
        ..Default::default()
    };

    for path in &files {
        let rows = match read_focus_file(path) {
            Ok(rows) => rows,
            Err(err @ PsfError::FileRead { .. }) => {
                warn!("{}", err);
                continue;
            }
            Err(err) => return Err(err),
        };
        summary.rows_read += rows.len();

        for row in rows {
            if !known.insert(mjd_key(row.mjd)) {
                summary.already_present += 1;
                continue;
            }
            match db.insert_focus_row(&row) {
                Ok(_) => summary.inserted += 1,
                Err(PsfError::DuplicateInsertion(what)) => {
                    debug!("Record already in table: {}", what);
                    summary.duplicates += 1;
                }
                Err(err) => return Err(err),
            }
        }
        debug!("Finished {}", path.display());
    }

    info!(
        inserted = summary.inserted,
        already_present = summary.already_present,
        duplicates = summary.duplicates,
        "Focus model ingested"
    );
    Ok(summary)
}

fn mjd_key(mjd: f64) -> i64 {
    (round_mjd(mjd) * 1e5).round() as i64
}
