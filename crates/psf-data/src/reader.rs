//! hst1pass `.stardb_xym` catalog parsing.
//!
//! Each file lists the point sources hst1pass detected in one image, one
//! whitespace-delimited row per source. Two layouts exist:
//!
//! * 12 columns: `x y mfit qfit zfit sfit cobs cexp N sat g1 g2`
//! * 13 columns: `x y mfit qfit zfit sfit cobs cexp aobs aexp bobs bexp N`
//!
//! The column count is fixed within a file.

use std::path::Path;

use psf_core::error::{PsfError, Result};
use psf_core::models::DetectedSource;
use tracing::{debug, info};

/// Sources with `qfit`, `g1` or `g2` above this value are discarded.
pub const QUALITY_THRESHOLD: f64 = 0.15;

/// Number of leading characters of a catalog file name forming the rootname.
pub const ROOTNAME_LEN: usize = 9;

// ── Layout ────────────────────────────────────────────────────────────────────

/// Column layout of a catalog file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XymLayout {
    /// 12 columns ending in `N sat g1 g2`.
    Shape,
    /// 13 columns with the `a`/`b` pixel fluxes and no saturation flag.
    Extended,
}

impl XymLayout {
    pub fn from_columns(n: usize) -> Option<Self> {
        match n {
            12 => Some(XymLayout::Shape),
            13 => Some(XymLayout::Extended),
            _ => None,
        }
    }

    pub fn columns(self) -> usize {
        match self {
            XymLayout::Shape => 12,
            XymLayout::Extended => 13,
        }
    }
}

// ── XymCatalog ────────────────────────────────────────────────────────────────

/// The sources of one catalog that survived the quality cuts.
#[derive(Debug, Clone, PartialEq)]
pub struct XymCatalog {
    /// Rootname taken from the file name (e.g. `ibcf01abq`).
    pub rootname: String,
    /// Layout detected from the first row, `None` for an empty file.
    pub layout: Option<XymLayout>,
    /// Kept sources, in file order.
    pub sources: Vec<DetectedSource>,
    /// Rows removed by the `qfit`/`g1`/`g2` threshold.
    pub rejected_quality: usize,
    /// Rows removed for saturation.
    pub rejected_saturated: usize,
}

impl XymCatalog {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Rootname encoded in a catalog file name.
pub fn rootname_from_path(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().chars().take(ROOTNAME_LEN).collect())
        .unwrap_or_default()
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Read a catalog file and apply the quality cuts.
///
/// A row with the wrong column count or a non-numeric value makes the
/// whole file a [`PsfError::MalformedRecord`]. An empty file yields an
/// empty catalog.
pub fn read_xym_file(path: &Path, include_saturated: bool) -> Result<XymCatalog> {
    let content = std::fs::read_to_string(path).map_err(|source| PsfError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let rootname = rootname_from_path(path);
    let (layout, rows) = parse_xym_str(path, &content)?;
    let (sources, rejected_quality, rejected_saturated) = apply_quality_cuts(rows, include_saturated);

    if !include_saturated && rejected_saturated > 0 {
        info!("Omitting {} saturated stars from {}", rejected_saturated, rootname);
    }
    if sources.is_empty() {
        info!("No PSFs in {}", rootname);
    } else {
        info!("{} PSFs in {}", sources.len(), rootname);
    }

    Ok(XymCatalog {
        rootname,
        layout,
        sources,
        rejected_quality,
        rejected_saturated,
    })
}

/// Parse every row of a catalog without filtering.
///
/// `path` is only used for error messages.
pub fn parse_xym_str(path: &Path, content: &str) -> Result<(Option<XymLayout>, Vec<DetectedSource>)> {
    let mut layout: Option<XymLayout> = None;
    let mut rows = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }

        let malformed = |reason: String| PsfError::MalformedRecord {
            path: path.to_path_buf(),
            line: line_no,
            reason,
        };

        let row_layout = match layout {
            Some(l) if l.columns() == fields.len() => l,
            Some(l) => {
                return Err(malformed(format!(
                    "expected {} columns, found {}",
                    l.columns(),
                    fields.len()
                )))
            }
            None => {
                let l = XymLayout::from_columns(fields.len()).ok_or_else(|| {
                    malformed(format!("expected 12 or 13 columns, found {}", fields.len()))
                })?;
                layout = Some(l);
                l
            }
        };

        rows.push(parse_row(&fields, row_layout).map_err(malformed)?);
    }

    debug!("{}: {} rows parsed", path.display(), rows.len());
    Ok((layout, rows))
}

/// Split sources into kept rows and rejection counts.
///
/// Returns `(kept, rejected_quality, rejected_saturated)`. Quality is judged
/// first, so a saturated row with a bad fit counts as a quality rejection.
pub fn apply_quality_cuts(
    rows: Vec<DetectedSource>,
    include_saturated: bool,
) -> (Vec<DetectedSource>, usize, usize) {
    let mut kept = Vec::with_capacity(rows.len());
    let mut rejected_quality = 0usize;
    let mut rejected_saturated = 0usize;

    for row in rows {
        if !passes_quality(&row) {
            rejected_quality += 1;
        } else if !include_saturated && row.saturated == Some(true) {
            rejected_saturated += 1;
        } else {
            kept.push(row);
        }
    }

    (kept, rejected_quality, rejected_saturated)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn passes_quality(row: &DetectedSource) -> bool {
    let within = |v: f64| v <= QUALITY_THRESHOLD;
    within(row.qfit) && row.g1.map_or(true, within) && row.g2.map_or(true, within)
}

fn parse_row(fields: &[&str], layout: XymLayout) -> std::result::Result<DetectedSource, String> {
    let num = |i: usize| -> std::result::Result<f64, String> {
        fields[i]
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("column {} is not a finite number: {:?}", i + 1, fields[i]))
    };

    let (label, saturated, g1, g2) = match layout {
        XymLayout::Shape => (
            fields[8].to_string(),
            Some(num(9)? != 0.0),
            Some(num(10)?),
            Some(num(11)?),
        ),
        XymLayout::Extended => {
            // aobs, aexp, bobs, bexp are validated but not kept.
            for i in 8..12 {
                num(i)?;
            }
            (fields[12].to_string(), None, None, None)
        }
    };

    Ok(DetectedSource {
        x: num(0)?,
        y: num(1)?,
        mfit: num(2)?,
        qfit: num(3)?,
        flux: num(4)?,
        sky: num(5)?,
        pixc: num(6)?,
        cexp: num(7)?,
        label,
        saturated,
        g1,
        g2,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn write_xym(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    const GOOD: &str = "  101.250  512.500 -12.000 0.040 63095.7   1.50  9800.0 0.200 N0001 0 0.010 0.020";
    const SATURATED: &str = "  200.000  300.000 -14.000 0.050 398107.0  1.20 60000.0 0.210 N0002 1 0.020 0.030";
    const BAD_QFIT: &str = "  300.000  400.000 -11.000 0.300 22908.7   1.40  4000.0 0.190 N0003 0 0.010 0.010";
    const BAD_G2: &str = "  400.000  500.000 -11.500 0.100 36307.8   1.30  5000.0 0.190 N0004 0 0.010 0.160";
    const EXTENDED: &str = "  50.5 60.5 -10.0 0.020 10000.0 2.0 1500.0 0.180 300.0 0.090 200.0 0.050 N0005";

    // ── read_xym_file ─────────────────────────────────────────────────────────

    #[test]
    fn test_read_applies_all_cuts() {
        let dir = TempDir::new().unwrap();
        let path = write_xym(
            dir.path(),
            "ibcf01abq_flt.stardb_xym",
            &[GOOD, SATURATED, BAD_QFIT, BAD_G2],
        );

        let cat = read_xym_file(&path, false).unwrap();
        assert_eq!(cat.rootname, "ibcf01abq");
        assert_eq!(cat.layout, Some(XymLayout::Shape));
        assert_eq!(cat.sources.len(), 1);
        assert_eq!(cat.sources[0].label, "N0001");
        assert_eq!(cat.sources[0].x, 101.25);
        assert_eq!(cat.sources[0].flux, 63095.7);
        assert_eq!(cat.rejected_quality, 2);
        assert_eq!(cat.rejected_saturated, 1);
    }

    #[test]
    fn test_read_include_saturated() {
        let dir = TempDir::new().unwrap();
        let path = write_xym(dir.path(), "ibcf01abq_flt.stardb_xym", &[GOOD, SATURATED]);

        let cat = read_xym_file(&path, true).unwrap();
        assert_eq!(cat.sources.len(), 2);
        assert_eq!(cat.sources[1].saturated, Some(true));
        assert_eq!(cat.rejected_saturated, 0);
    }

    #[test]
    fn test_read_threshold_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let edge = "1 2 -10 0.15 100 1 50 0.2 N0001 0 0.15 0.15";
        let path = write_xym(dir.path(), "ibcf01abq_flt.stardb_xym", &[edge]);
        let cat = read_xym_file(&path, false).unwrap();
        assert_eq!(cat.sources.len(), 1);
    }

    #[test]
    fn test_read_extended_layout() {
        let dir = TempDir::new().unwrap();
        let path = write_xym(dir.path(), "ibcf02xyq_flt.stardb_xym", &[EXTENDED]);

        let cat = read_xym_file(&path, false).unwrap();
        assert_eq!(cat.layout, Some(XymLayout::Extended));
        assert_eq!(cat.sources.len(), 1);
        assert_eq!(cat.sources[0].label, "N0005");
        assert!(cat.sources[0].saturated.is_none());
        assert!(cat.sources[0].g1.is_none());
    }

    #[test]
    fn test_read_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write_xym(dir.path(), "ibcf01abq_flt.stardb_xym", &[]);
        let cat = read_xym_file(&path, false).unwrap();
        assert!(cat.is_empty());
        assert!(cat.layout.is_none());
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_xym_file(Path::new("/tmp/does-not-exist-irpsf/x_flt.stardb_xym"), false)
            .unwrap_err();
        assert!(matches!(err, PsfError::FileRead { .. }));
    }

    // ── malformed input ───────────────────────────────────────────────────────

    #[test]
    fn test_wrong_column_count_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = write_xym(dir.path(), "ibcf01abq_flt.stardb_xym", &[GOOD, "1 2 3"]);
        match read_xym_file(&path, false).unwrap_err() {
            PsfError::MalformedRecord { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("found 3"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_mixed_layouts_are_malformed() {
        let dir = TempDir::new().unwrap();
        let path = write_xym(dir.path(), "ibcf01abq_flt.stardb_xym", &[GOOD, EXTENDED]);
        assert!(matches!(
            read_xym_file(&path, false),
            Err(PsfError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_non_numeric_field_is_malformed() {
        let dir = TempDir::new().unwrap();
        let bad = "1 2 -10 abc 100 1 50 0.2 N0001 0 0.1 0.1";
        let path = write_xym(dir.path(), "ibcf01abq_flt.stardb_xym", &[bad]);
        match read_xym_file(&path, false).unwrap_err() {
            PsfError::MalformedRecord { line, reason, .. } => {
                assert_eq!(line, 1);
                assert!(reason.contains("column 4"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_field_is_malformed() {
        for (bad, column) in [
            ("1 2 -10 0.05 NaN 1 50 0.2 N0001 0 0.1 0.1", "column 5"),
            ("1 2 -10 NaN 100 1 50 0.2 N0001 0 0.1 0.1", "column 4"),
            ("inf 2 -10 0.05 100 1 50 0.2 N0001 0 0.1 0.1", "column 1"),
        ] {
            match parse_xym_str(Path::new("x"), &format!("{bad}\n")).unwrap_err() {
                PsfError::MalformedRecord { reason, .. } => assert!(reason.contains(column)),
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    // ── rootname_from_path ────────────────────────────────────────────────────

    #[test]
    fn test_rootname_from_path() {
        assert_eq!(
            rootname_from_path(Path::new("/out/F160W/ibcf01abq_flt.stardb_xym")),
            "ibcf01abq"
        );
        assert_eq!(rootname_from_path(Path::new("/out/ab")), "ab");
    }
}
