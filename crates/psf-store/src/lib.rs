//! SQLite persistence for the WFC3/IR PSF pipeline.
//!
//! [`PsfDatabase`] owns the pipeline's own tables; [`QuicklookDatabase`]
//! is a read-only view over the external observation-metadata store.

mod migrations;
pub mod psf_db;
pub mod quicklook;

pub use migrations::CURRENT_SCHEMA_VERSION;
pub use psf_db::PsfDatabase;
pub use quicklook::QuicklookDatabase;
