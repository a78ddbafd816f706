//! Focus-model interpolation.
//!
//! The breathing focus model is sampled roughly every five minutes. For each
//! exposure the samples within a fixed window around mid-exposure are pulled
//! from the store and reduced to a single [`FocusEstimate`].

use crate::error::{PsfError, Result};
use crate::models::{FocusEstimate, FocusSample};
use crate::time_utils::mjd_to_datetime;

/// Default window half-width: six minutes, in days.
pub const DEFAULT_HALF_WIDTH_DAYS: f64 = 0.004_166_67;

/// Nominal focus-model sampling cadence: five minutes, in days.
pub const DEFAULT_CADENCE_DAYS: f64 = 5.0 / 1440.0;

const MINUTES_PER_DAY: f64 = 1440.0;

// ── FocusSource ───────────────────────────────────────────────────────────────

/// Anything that can answer a focus-model range query.
///
/// Implementations return every sample with `lo <= mjd <= hi` in any order.
pub trait FocusSource {
    fn samples_between(&self, lo: f64, hi: f64) -> Result<Vec<FocusSample>>;
}

impl FocusSource for [FocusSample] {
    fn samples_between(&self, lo: f64, hi: f64) -> Result<Vec<FocusSample>> {
        Ok(self
            .iter()
            .copied()
            .filter(|s| s.mjd >= lo && s.mjd <= hi)
            .collect())
    }
}

impl FocusSource for Vec<FocusSample> {
    fn samples_between(&self, lo: f64, hi: f64) -> Result<Vec<FocusSample>> {
        self.as_slice().samples_between(lo, hi)
    }
}

// ── FocusWindow ───────────────────────────────────────────────────────────────

/// The `[t - w, t + w]` window used to select focus samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusWindow {
    half_width: f64,
}

impl Default for FocusWindow {
    fn default() -> Self {
        Self {
            half_width: DEFAULT_HALF_WIDTH_DAYS,
        }
    }
}

impl FocusWindow {
    /// Create a window with the given half-width in days.
    ///
    /// The half-width must be finite, positive and wider than half the
    /// sampling cadence, otherwise a target falling between two samples can
    /// see none of them.
    pub fn new(half_width: f64, cadence: f64) -> Result<Self> {
        if !half_width.is_finite() || half_width <= 0.0 {
            return Err(PsfError::InvalidWindow(format!(
                "half-width must be a positive number of days, got {half_width}"
            )));
        }
        if !cadence.is_finite() || cadence <= 0.0 {
            return Err(PsfError::InvalidWindow(format!(
                "cadence must be a positive number of days, got {cadence}"
            )));
        }
        if half_width <= cadence / 2.0 {
            return Err(PsfError::InvalidWindow(format!(
                "half-width {:.2} min does not exceed half the {:.2} min cadence",
                half_width * MINUTES_PER_DAY,
                cadence * MINUTES_PER_DAY
            )));
        }
        Ok(Self { half_width })
    }

    /// Same as [`FocusWindow::new`] with both values in minutes.
    pub fn from_minutes(half_width_minutes: f64, cadence_minutes: f64) -> Result<Self> {
        Self::new(
            half_width_minutes / MINUTES_PER_DAY,
            cadence_minutes / MINUTES_PER_DAY,
        )
    }

    pub fn half_width(&self) -> f64 {
        self.half_width
    }

    /// Inclusive `(lo, hi)` bounds of the window around `target`.
    pub fn bounds(&self, target: f64) -> (f64, f64) {
        (target - self.half_width, target + self.half_width)
    }

    /// Query `source` for the samples around `target` and reduce them.
    pub fn estimate<S: FocusSource + ?Sized>(
        &self,
        target: f64,
        source: &S,
    ) -> Result<Option<FocusEstimate>> {
        let (lo, hi) = self.bounds(target);
        let samples = source.samples_between(lo, hi)?;
        Ok(estimate_focus(target, &samples))
    }
}

// ── estimate_focus ────────────────────────────────────────────────────────────

/// Reduce the focus samples inside a window to one estimate at `target`.
///
/// * no samples: `None`, the focus is unknown.
/// * one sample: its value, reported at `target` rather than at the
///   sample's own time.
/// * two or more: linear interpolation over the time-sorted samples, held
///   constant beyond the first and last sample.
///
/// Samples sharing a timestamp keep the first occurrence. A non-finite
/// `target` yields `None`.
pub fn estimate_focus(target: f64, samples: &[FocusSample]) -> Option<FocusEstimate> {
    if !target.is_finite() {
        return None;
    }
    let focus = match samples {
        [] => return None,
        [only] => only.focus,
        _ => interpolate(target, &sorted_unique(samples)),
    };
    let date = mjd_to_datetime(target)?;
    Some(FocusEstimate {
        mjd: target,
        date,
        focus,
    })
}

/// Stable sort by time and drop later samples with a repeated timestamp.
fn sorted_unique(samples: &[FocusSample]) -> Vec<FocusSample> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.mjd.total_cmp(&b.mjd));
    sorted.dedup_by(|later, earlier| later.mjd == earlier.mjd);
    sorted
}

/// Piecewise-linear interpolation over non-empty, sorted, unique samples.
fn interpolate(target: f64, sorted: &[FocusSample]) -> f64 {
    let first = sorted[0];
    let last = sorted[sorted.len() - 1];
    if target <= first.mjd {
        return first.focus;
    }
    if target >= last.mjd {
        return last.focus;
    }
    // First index with mjd > target; in 1..len because of the checks above.
    let upper = sorted.partition_point(|s| s.mjd <= target);
    let (a, b) = (sorted[upper - 1], sorted[upper]);
    a.focus + (b.focus - a.focus) * (target - a.mjd) / (b.mjd - a.mjd)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
