//! WFC3/IR filter tables.

/// Every IR imaging filter the pipeline keeps an output directory for.
pub const IR_FILTERS: &[&str] = &[
    "F105W", "F110W", "F125W", "F140W", "F160W", "F098M", "F127M", "F139M", "F153M", "F126N",
    "F128N", "F130N", "F132N", "F164N", "F167N",
];

/// Apertures accepted as full-frame IR images.
pub const FULL_FRAME_APERTURES: &[&str] = &["IR", "IR-FIX"];

/// Grism and blank filters, which produce no usable point sources.
pub const EXCLUDED_FILTERS: &[&str] = &["G102", "G141", "Blank"];

/// Dark-frame target names.
pub const EXCLUDED_TARGETS: &[&str] = &["DARK", "DARK-NM"];

/// Guide-star / lock failure quality flags.
pub const EXCLUDED_QUALITY: &[&str] = &["GSFAIL", "LOCKLOST", "ACQ2FAIL"];

/// Library PSF model used by hst1pass for each filter.
///
/// Medium and narrow band filters borrow the model of the nearest wide
/// band. Returns `None` for filters without a model.
pub fn psf_model_for(filter: &str) -> Option<&'static str> {
    let model = match filter.to_ascii_uppercase().as_str() {
        "F105W" | "F098M" => "PSFSTD_WFC3IR_F105W.fits",
        "F110W" => "PSFSTD_WFC3IR_F110W.fits",
        "F125W" | "F127M" | "F126N" => "PSFSTD_WFC3IR_F125W.fits",
        "F128N" | "F130N" | "F132N" => "PSFSTD_WFC3IR_F127M.fits",
        "F140W" | "F139M" => "PSFSTD_WFC3IR_F140W.fits",
        "F160W" | "F153M" | "F164N" | "F167N" => "PSFSTD_WFC3IR_F160W.fits",
        _ => return None,
    };
    Some(model)
}

/// Normalise a `--filter` argument: `None` means every filter.
pub fn parse_filter_arg(arg: &str) -> Option<String> {
    if arg.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(arg.to_ascii_uppercase())
    }
}
