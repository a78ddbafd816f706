//! FITS header access and pixel-to-sky projection.
//!
//! Only what is needed to place detected sources on the sky: read the WCS
//! keywords of one HDU through `fitrs` and evaluate the linear gnomonic
//! (TAN) projection they describe. Distortion terms (SIP) are not applied.

use std::collections::HashMap;
use std::path::Path;

use fitrs::{Fits, HeaderValue};
use psf_core::error::{PsfError, Result};
use tracing::debug;

/// Keywords copied out of an HDU by [`read_header`].
const HEADER_KEYWORDS: &[&str] = &[
    "XTENSION", "EXTNAME", "NAXIS", "NAXIS1", "NAXIS2", "CTYPE1", "CTYPE2", "CRVAL1", "CRVAL2",
    "CRPIX1", "CRPIX2", "CD1_1", "CD1_2", "CD2_1", "CD2_2", "A_ORDER",
];

// ── SkyProjection ─────────────────────────────────────────────────────────────

/// Converts 1-based pixel coordinates to `(ra, dec)` in degrees.
pub trait SkyProjection {
    fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64);
}

// ── FitsHeader ────────────────────────────────────────────────────────────────

/// Keyword/value pairs of one FITS header, values kept as text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsHeader {
    keywords: HashMap<String, String>,
}

impl FitsHeader {
    /// Build a header from `(keyword, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            keywords: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Copy the keywords this module reads out of a `fitrs` HDU.
    fn from_hdu(hdu: &fitrs::Hdu) -> Self {
        Self::from_pairs(HEADER_KEYWORDS.iter().filter_map(|key| {
            let text = value_text(hdu.value(key)?)?;
            Some((*key, text))
        }))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.keywords.get(key).map(String::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.replace(['D', 'd'], "E").parse().ok()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.parse().ok()
    }
}

fn value_text(value: &HeaderValue) -> Option<String> {
    match value {
        HeaderValue::CharacterString(s) => Some(s.trim().to_string()),
        HeaderValue::Logical(b) => Some(if *b { "T" } else { "F" }.to_string()),
        HeaderValue::IntegerNumber(n) => Some(n.to_string()),
        HeaderValue::RealFloatingNumber(f) => Some(f.to_string()),
        _ => None,
    }
}

/// Read the header of HDU `index` (0 = primary) of a FITS file.
pub fn read_header(path: &Path, index: usize) -> Result<FitsHeader> {
    let fits = Fits::open(path).map_err(|source| PsfError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let hdu = fits.get(index).ok_or_else(|| PsfError::Wcs {
        path: path.to_path_buf(),
        reason: format!("HDU {index} not found"),
    })?;
    Ok(FitsHeader::from_hdu(&hdu))
}

// ── TanProjection ─────────────────────────────────────────────────────────────

/// Linear gnomonic projection from `CRVAL`, `CRPIX` and the `CD` matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TanProjection {
    pub crval1: f64,
    pub crval2: f64,
    pub crpix1: f64,
    pub crpix2: f64,
    pub cd: [[f64; 2]; 2],
}

impl TanProjection {
    /// Build the projection from header keywords.
    pub fn from_header(header: &FitsHeader) -> Option<Self> {
        if let Some(ctype) = header.get("CTYPE1") {
            if !ctype.contains("TAN") {
                return None;
            }
        }
        Some(Self {
            crval1: header.get_f64("CRVAL1")?,
            crval2: header.get_f64("CRVAL2")?,
            crpix1: header.get_f64("CRPIX1")?,
            crpix2: header.get_f64("CRPIX2")?,
            cd: [
                [header.get_f64("CD1_1")?, header.get_f64("CD1_2")?],
                [header.get_f64("CD2_1")?, header.get_f64("CD2_2")?],
            ],
        })
    }

    /// Read the projection of the first extension (the SCI array).
    pub fn from_fits(path: &Path) -> Result<Self> {
        let header = read_header(path, 1)?;
        if header.get("A_ORDER").is_some() {
            debug!("{}: ignoring SIP distortion terms", path.display());
        }
        Self::from_header(&header).ok_or_else(|| PsfError::Wcs {
            path: path.to_path_buf(),
            reason: "missing CRVAL/CRPIX/CD keywords or non-TAN projection".to_string(),
        })
    }
}

impl SkyProjection for TanProjection {
    fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.crpix1;
        let dy = y - self.crpix2;
        let xi = (self.cd[0][0] * dx + self.cd[0][1] * dy).to_radians();
        let eta = (self.cd[1][0] * dx + self.cd[1][1] * dy).to_radians();

        let ra0 = self.crval1.to_radians();
        let dec0 = self.crval2.to_radians();
        let denom = dec0.cos() - eta * dec0.sin();

        let ra = ra0 + xi.atan2(denom);
        let dec = (dec0.sin() + eta * dec0.cos()).atan2(xi.hypot(denom));
        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
