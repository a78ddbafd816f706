//! MAST delivery files.
//!
//! A full dump of `psf_mast` is written as comma-separated rows in the
//! delivery column order. The delivery itself is the set of dump rows not
//! present in the previously delivered dump.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use psf_core::error::{PsfError, Result};
use psf_core::models::PsfRecord;
use psf_core::time_utils::format_db_datetime;
use tracing::info;

/// Column header of a delivery file.
pub const DELIVERY_HEADER: &str = "id,rootname,filter,aperture,psf_x_center,psf_y_center,chip,psf_flux,sky,qfit,pixc,midexp,mjd,date,focus";

/// WFC3/IR has a single detector chip.
pub const IR_CHIP: u8 = 1;

/// Outcome of [`make_mast_deliverable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub output: PathBuf,
    pub old_rows: usize,
    pub new_rows: usize,
    pub delivered: usize,
}

/// `psf_mast_2017_01_01.txt` -> `psf_mast_2017_01_01_deliver.csv`.
pub fn delivery_path(new_table: &Path) -> PathBuf {
    let name = new_table
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name.strip_suffix(".txt").unwrap_or(&name);
    new_table.with_file_name(format!("{stem}_deliver.csv"))
}

/// Write the rows of `new_table` missing from `old_table` to the delivery file.
///
/// Rows are compared after trimming whitespace; blank lines are ignored and
/// a row repeated in the new dump is delivered once. Output keeps the order
/// of the new dump.
pub fn make_mast_deliverable(old_table: &Path, new_table: &Path) -> Result<DeliveryReport> {
    info!("Reading in {}", old_table.display());
    let old = read_rows(old_table)?;
    info!("Reading in {}", new_table.display());
    let new = read_rows(new_table)?;

    let old_set: HashSet<&str> = old.iter().map(String::as_str).collect();
    let mut emitted: HashSet<&str> = HashSet::new();
    let delivery: Vec<&str> = new
        .iter()
        .map(String::as_str)
        .filter(|row| !old_set.contains(row) && emitted.insert(*row))
        .collect();

    let output = delivery_path(new_table);
    let mut writer = BufWriter::new(File::create(&output)?);
    writeln!(writer, "{DELIVERY_HEADER}")?;
    for row in &delivery {
        writeln!(writer, "{row}")?;
    }
    writer.flush()?;

    info!(
        output = %output.display(),
        rows = delivery.len(),
        "Deliverable psf_mast table written"
    );

    Ok(DeliveryReport {
        output,
        old_rows: old.len(),
        new_rows: new.len(),
        delivered: delivery.len(),
    })
}

/// Write `(id, record)` rows as a delivery-ordered dump without header.
///
/// Fields holding a comma or a quote are quoted, so every line keeps the
/// [`DELIVERY_HEADER`] column count.
pub fn write_dump(path: &Path, rows: &[(i64, PsfRecord)]) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)
        .map_err(std::io::Error::from)?;
    for (id, record) in rows {
        writer
            .write_record(dump_fields(*id, record))
            .map_err(std::io::Error::from)?;
    }
    writer.flush()?;
    info!("Wrote {} psf_mast rows to {}", rows.len(), path.display());
    Ok(rows.len())
}

/// One dump row in [`DELIVERY_HEADER`] order. Missing values are empty.
pub fn dump_fields(id: i64, r: &PsfRecord) -> [String; 15] {
    let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
    [
        id.to_string(),
        r.rootname.clone(),
        r.filter.clone(),
        r.aperture.clone(),
        r.psf_x_center.to_string(),
        r.psf_y_center.to_string(),
        IR_CHIP.to_string(),
        r.psf_flux.to_string(),
        r.sky.to_string(),
        opt(r.qfit),
        opt(r.pixc),
        format!("{:.5}", r.midexp),
        r.mjd.map(|m| format!("{m:.5}")).unwrap_or_default(),
        r.date.as_ref().map(format_db_datetime).unwrap_or_default(),
        opt(r.focus),
    ]
}

fn read_rows(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|source| PsfError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
