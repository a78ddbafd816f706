//! File formats of the WFC3/IR PSF pipeline.
//!
//! Reads hst1pass catalogs and focus-model text files, inventories the
//! output tree, projects pixel positions through the image WCS and writes
//! the MAST delivery files.

pub mod deliverable;
pub mod discovery;
pub mod focus_file;
pub mod reader;
pub mod wcs;

pub use psf_core as core;
