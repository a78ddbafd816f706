//! Focus-model text files.
//!
//! One measurement per line: `<mjd>, <Mon> <DD> <YYYY> <HH:MM:SS> <focus>`,
//! e.g. `55197.00347, Jan 01 2010 00:05:00 -1.23`.

use std::path::Path;

use psf_core::error::{PsfError, Result};
use psf_core::models::FocusModelRow;
use psf_core::time_utils::parse_focus_timestamp;
use tracing::{debug, warn};

/// Parse one line of a focus-model file.
pub fn parse_focus_line(line: &str) -> Result<FocusModelRow> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(PsfError::FocusModelParse(format!(
            "expected 6 fields, found {}: {:?}",
            fields.len(),
            line
        )));
    }

    // The MJD token carries a trailing separator.
    let mjd_text = fields[0]
        .strip_suffix(|c: char| !c.is_ascii_digit())
        .unwrap_or(fields[0]);
    let mjd: f64 = mjd_text
        .parse()
        .map_err(|_| PsfError::FocusModelParse(format!("bad MJD {:?}", fields[0])))?;

    let date_text = fields[1..5].join(" ");
    let date = parse_focus_timestamp(&date_text)
        .ok_or_else(|| PsfError::FocusModelParse(format!("bad date {:?}", date_text)))?;

    let focus: f64 = fields[5]
        .parse()
        .map_err(|_| PsfError::FocusModelParse(format!("bad focus {:?}", fields[5])))?;

    Ok(FocusModelRow { mjd, date, focus })
}

/// Read every well-formed row of a focus-model file.
///
/// Malformed lines are logged and skipped; only failing to read the file
/// is an error.
pub fn read_focus_file(path: &Path) -> Result<Vec<FocusModelRow>> {
    let content = std::fs::read_to_string(path).map_err(|source| PsfError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_focus_line(line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                skipped += 1;
                warn!("{} line {}: {}", path.display(), idx + 1, e);
            }
        }
    }

    debug!(
        "{}: {} focus rows, {} skipped",
        path.display(),
        rows.len(),
        skipped
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn test_parse_focus_line() {
        let row = parse_focus_line("55197.00347, Jan 01 2010 00:05:00 -1.23").unwrap();
        assert_eq!(row.mjd, 55197.00347);
        assert_eq!(
            row.date,
            NaiveDate::from_ymd_opt(2010, 1, 1)
                .unwrap()
                .and_hms_opt(0, 5, 0)
                .unwrap()
        );
        assert_eq!(row.focus, -1.23);
    }

    #[test]
    fn test_parse_focus_line_without_separator() {
        let row = parse_focus_line("55197.00347 Jan 01 2010 00:05:00 0.5").unwrap();
        assert_eq!(row.mjd, 55197.00347);
    }

    #[test]
    fn test_parse_focus_line_errors() {
        assert!(matches!(
            parse_focus_line("55197.0, Jan 01 2010"),
            Err(PsfError::FocusModelParse(_))
        ));
        assert!(parse_focus_line("x, Jan 01 2010 00:05:00 1.0").is_err());
        assert!(parse_focus_line("55197.0, Foo 01 2010 00:05:00 1.0").is_err());
        assert!(parse_focus_line("55197.0, Jan 01 2010 00:05:00 high").is_err());
    }

    #[test]
    fn test_read_focus_file_skips_bad_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Focus2010.txt");
        std::fs::write(
            &path,
            "55197.00347, Jan 01 2010 00:05:00 -1.23\n\ngarbage\n55197.00694, Jan 01 2010 00:10:00 -1.10\n",
        )
        .unwrap();

        let rows = read_focus_file(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].focus, -1.10);
    }

    #[test]
    fn test_read_focus_file_missing() {
        let err = read_focus_file(Path::new("/tmp/does-not-exist-irpsf/Focus.txt")).unwrap_err();
        assert!(matches!(err, PsfError::FileRead { .. }));
    }
}
