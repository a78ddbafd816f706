use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time_utils::mid_exposure;

/// Length of a QL rootname (the on-disk rootname without its suffix letter).
pub const QL_ROOT_LEN: usize = 8;

/// Strip a 9-character on-disk rootname (e.g. `ibcf01abq`) down to the
/// 8-character QL root (`ibcf01ab`). Shorter names are returned unchanged.
pub fn ql_root(rootname: &str) -> &str {
    match rootname.char_indices().nth(QL_ROOT_LEN) {
        Some((idx, _)) => &rootname[..idx],
        None => rootname,
    }
}

/// One WFC3/IR exposure as described by the quicklook metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureMetadata {
    /// 8-character QL rootname.
    pub ql_root: String,
    /// Observation filter (e.g. `F160W`).
    pub filter: String,
    /// Aperture name (e.g. `IR`, `IR-FIX`).
    pub aperture: String,
    /// Exposure start, MJD.
    pub expstart: f64,
    /// Exposure end, MJD.
    pub expend: f64,
    /// Directory holding the calibrated `*flt.fits` products.
    pub directory: String,
    /// Sun angle at observation time, degrees.
    #[serde(default)]
    pub sun_angle: Option<f64>,
    /// Exposure time, seconds.
    #[serde(default)]
    pub exptime: Option<f64>,
    /// FGS lock status (`FINE`, `COARSE`, `GYROS`, ...).
    #[serde(default)]
    pub fgs_lock: Option<String>,
    /// Observation date (midnight of `DATE-OBS`).
    pub date_obs: NaiveDateTime,
}

impl ExposureMetadata {
    /// Mid-exposure time in MJD.
    pub fn midexp(&self) -> f64 {
        mid_exposure(self.expstart, self.expend)
    }
}

/// A QL row used to schedule one hst1pass run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QlRecord {
    pub filter: String,
    pub ql_root: String,
    pub directory: String,
}

/// A single focus-model measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusSample {
    /// Measurement time, MJD.
    pub mjd: f64,
    /// Modelled focus, microns.
    pub focus: f64,
}

impl FocusSample {
    pub fn new(mjd: f64, focus: f64) -> Self {
        Self { mjd, focus }
    }
}

/// A focus-model row as written to / read from the `focus_model` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusModelRow {
    pub mjd: f64,
    pub date: NaiveDateTime,
    pub focus: f64,
}

impl FocusModelRow {
    pub fn sample(&self) -> FocusSample {
        FocusSample::new(self.mjd, self.focus)
    }
}

/// The focus value attached to one exposure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusEstimate {
    /// Time the estimate refers to (the target mid-exposure time), MJD.
    pub mjd: f64,
    /// `mjd` as a calendar date-time.
    pub date: DateTime<Utc>,
    /// Focus value, microns.
    pub focus: f64,
}

/// One row of an hst1pass `.stardb_xym` catalog.
///
/// Columns only present in one of the two file layouts are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSource {
    /// Fitted x position (1-based pixels).
    pub x: f64,
    /// Fitted y position (1-based pixels).
    pub y: f64,
    /// Instrumental magnitude.
    pub mfit: f64,
    /// Quality of fit, absolute fractional residual (0 = perfect).
    pub qfit: f64,
    /// Fitted flux, `10**(-mfit/2.5)`.
    pub flux: f64,
    /// Fitted sky.
    pub sky: f64,
    /// Central pixel value.
    pub pixc: f64,
    /// Fraction of light expected in the central pixel.
    pub cexp: f64,
    /// Star label (`N` + star number).
    pub label: String,
    /// Saturation flag (12-column layout only).
    pub saturated: Option<bool>,
    /// Shape parameters (12-column layout only).
    pub g1: Option<f64>,
    pub g2: Option<f64>,
}

/// One row of the `psf_mast` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsfRecord {
    pub rootname: String,
    pub filter: String,
    pub aperture: String,
    pub psf_x_center: f64,
    pub psf_y_center: f64,
    pub psf_ra: f64,
    pub psf_dec: f64,
    pub psf_flux: f64,
    pub sky: f64,
    pub qfit: Option<f64>,
    pub pixc: Option<f64>,
    /// Mid-exposure time, MJD.
    pub midexp: f64,
    /// Focus-model time the estimate refers to, MJD.
    pub mjd: Option<f64>,
    pub date: Option<NaiveDateTime>,
    pub focus: Option<f64>,
    pub exptime: Option<f64>,
    pub sun_angle: Option<f64>,
    pub fgs_lock: Option<String>,
}

impl PsfRecord {
    /// Build a row from one detected source, its exposure and focus estimate.
    pub fn from_source(
        rootname: &str,
        source: &DetectedSource,
        sky_position: (f64, f64),
        meta: &ExposureMetadata,
        focus: Option<&FocusEstimate>,
    ) -> Self {
        Self {
            rootname: rootname.to_string(),
            filter: meta.filter.clone(),
            aperture: meta.aperture.clone(),
            psf_x_center: source.x,
            psf_y_center: source.y,
            psf_ra: sky_position.0,
            psf_dec: sky_position.1,
            psf_flux: source.flux,
            sky: source.sky,
            qfit: Some(source.qfit),
            pixc: Some(source.pixc),
            midexp: meta.midexp(),
            mjd: focus.map(|f| f.mjd),
            date: focus.map(|f| f.date.naive_utc()),
            focus: focus.map(|f| f.focus),
            exptime: meta.exptime,
            sun_angle: meta.sun_angle,
            fgs_lock: meta.fgs_lock.clone(),
        }
    }
}
