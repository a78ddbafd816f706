//! Core types and algorithms for the WFC3/IR PSF pipeline.
//!
//! Holds the error taxonomy, configuration, data model, time conversions
//! and the two pure algorithms the rest of the workspace is built around:
//! focus-model interpolation and incremental-ingestion reconciliation.

pub mod error;
pub mod filters;
pub mod focus;
pub mod models;
pub mod reconcile;
pub mod settings;
pub mod time_utils;

pub use error::{PsfError, Result};
