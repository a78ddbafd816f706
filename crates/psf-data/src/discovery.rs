//! Filesystem inventory of hst1pass outputs and calibrated images.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use psf_core::models::QL_ROOT_LEN;
use regex::Regex;
use tracing::{debug, warn};

use crate::reader::ROOTNAME_LEN;

/// Find hst1pass raster outputs (`*ras`) directly inside `dir`, sorted.
pub fn find_ras_files(dir: &Path) -> Vec<PathBuf> {
    list_files(dir, 1)
        .into_iter()
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().ends_with("ras"))
                .unwrap_or(false)
        })
        .collect()
}

/// Rootnames with a raster output in one filter directory, in path order.
pub fn rootnames_in_filter_dir(dir: &Path) -> Vec<String> {
    let re = Regex::new(r"^([A-Za-z0-9]{9})").expect("regex is valid");
    let mut seen = HashSet::new();
    let mut rootnames = Vec::new();

    for path in find_ras_files(dir) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match re.captures(&name) {
            Some(caps) => {
                let root = caps[1].to_string();
                if seen.insert(root.clone()) {
                    rootnames.push(root);
                }
            }
            None => warn!("Ignoring output with unexpected name: {}", path.display()),
        }
    }

    debug!("{} rootnames in {}", rootnames.len(), dir.display());
    rootnames
}

/// QL roots that already have raster outputs in any filter directory.
///
/// Scans `<output_dir>/*/*ras`; the QL root is the first eight characters
/// of the file name before its first underscore.
pub fn processed_ql_roots(output_dir: &Path) -> HashSet<String> {
    list_files(output_dir, 2)
        .into_iter()
        .filter(|p| p.parent().map(|d| d != output_dir).unwrap_or(false))
        .filter_map(|p| {
            let name = p.file_name()?.to_string_lossy().to_string();
            if !name.ends_with("ras") {
                return None;
            }
            let stem = name.split('_').next().unwrap_or("");
            Some(stem.chars().take(QL_ROOT_LEN).collect())
        })
        .collect()
}

/// Filter directories (names starting with `F`) under `output_dir`, sorted.
pub fn filter_dirs(output_dir: &Path) -> Vec<String> {
    if !output_dir.exists() {
        warn!("Output directory does not exist: {}", output_dir.display());
        return Vec::new();
    }

    let mut names: Vec<String> = walkdir::WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with('F'))
        .collect();

    names.sort();
    names
}

/// Locate the calibrated image `<rootname>*flt.fits` in `dir`.
pub fn find_flt_image(dir: &Path, rootname: &str) -> Option<PathBuf> {
    let prefix: String = rootname.chars().take(ROOTNAME_LEN).collect();
    list_files(dir, 1).into_iter().find(|p| {
        p.file_name()
            .map(|n| {
                let n = n.to_string_lossy();
                n.starts_with(&prefix) && n.ends_with("flt.fits")
            })
            .unwrap_or(false)
    })
}

/// Path of the catalog hst1pass writes for `rootname` in a filter directory.
pub fn xym_path(filter_dir: &Path, rootname: &str) -> PathBuf {
    filter_dir.join(format!("{rootname}_flt.stardb_xym"))
}

/// Find the focus-model files (`*Focus*.txt`) in `dir`, sorted.
pub fn find_focus_files(dir: &Path) -> Vec<PathBuf> {
    list_files(dir, 1)
        .into_iter()
        .filter(|p| {
            p.file_name()
                .map(|n| {
                    let n = n.to_string_lossy();
                    n.contains("Focus") && n.ends_with(".txt")
                })
                .unwrap_or(false)
        })
        .collect()
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Regular files under `dir` up to `max_depth`, sorted by path.
fn list_files(dir: &Path, max_depth: usize) -> Vec<PathBuf> {
    if !dir.exists() {
        warn!("Directory does not exist: {}", dir.display());
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}

// ── Tests ─────────────────────────────────────────────────────────────────────
