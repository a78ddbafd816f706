//! Pipeline stages of the WFC3/IR PSF pipeline.
//!
//! Ties the file formats and the databases together: the hst1pass worker
//! pool, PSF catalog ingestion and focus-model ingestion.

pub mod focus_ingest;
pub mod ingest;
pub mod pool;

pub use psf_core as core;
pub use psf_data as data;
pub use psf_store as store;
