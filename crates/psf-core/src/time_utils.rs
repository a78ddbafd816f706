use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use tracing::warn;

// ── Modified Julian Date ──────────────────────────────────────────────────────

/// MJD of the Unix epoch (1970-01-01T00:00:00Z).
pub const MJD_UNIX_EPOCH: f64 = 40_587.0;

const MICROS_PER_DAY: f64 = 86_400_000_000.0;

/// Convert an MJD value to a UTC [`DateTime`], rounded to the microsecond.
///
/// Returns `None` for non-finite input or values outside chrono's range.
pub fn mjd_to_datetime(mjd: f64) -> Option<DateTime<Utc>> {
    if !mjd.is_finite() {
        return None;
    }
    let micros = ((mjd - MJD_UNIX_EPOCH) * MICROS_PER_DAY).round();
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    let micros = micros as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Convert a UTC [`DateTime`] to MJD.
pub fn datetime_to_mjd(dt: DateTime<Utc>) -> f64 {
    MJD_UNIX_EPOCH + dt.timestamp_micros() as f64 / MICROS_PER_DAY
}

/// Round an MJD to the five decimals the focus table keys on.
pub fn round_mjd(mjd: f64) -> f64 {
    (mjd * 1e5).round() / 1e5
}

/// Mid-exposure time: the arithmetic mean of start and end.
pub fn mid_exposure(expstart: f64, expend: f64) -> f64 {
    (expstart + expend) / 2.0
}

// ── Proprietary period ────────────────────────────────────────────────────────

/// The instant before which an observation is out of its one-year embargo.
///
/// Uses calendar arithmetic (the year field goes back by one), so the
/// window is 366 days when it spans a leap day. On 29 February the cutoff
/// lands on 28 February of the previous year.
pub fn embargo_cutoff(now: NaiveDateTime) -> NaiveDateTime {
    now.checked_sub_months(Months::new(12)).unwrap_or_else(|| {
        warn!("embargo_cutoff: calendar subtraction overflowed for {now}");
        now - TimeDelta::days(365)
    })
}

/// `true` when an observation taken at `observed` is public at `now`.
///
/// An observation exactly one year old is still proprietary.
pub fn is_public(observed: NaiveDateTime, now: NaiveDateTime) -> bool {
    observed < embargo_cutoff(now)
}

/// Promote an observation date to midnight of that day.
pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

// ── Text timestamps ───────────────────────────────────────────────────────────

/// Parse the `"Jan 01 2010 00:05:00"` form used by the focus-model files.
pub fn parse_focus_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), "%b %d %Y %H:%M:%S").ok()
}

/// Parse an ISO-8601 date or date-time as stored by the databases.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS[.f]` and the `T`-separated
/// variants. Returns `None` for anything else.
pub fn parse_db_datetime(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    let s = s.trim();
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(start_of_day)
}

/// Format a date-time the way it is written to the PSF database.
pub fn format_db_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
