use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the IR PSF pipeline.
///
/// Only [`PsfError::Database`], [`PsfError::Config`] and the raw I/O
/// variants are meant to abort a run. The per-item variants are logged by
/// the caller, which then moves on to the next rootname, file or row.
#[derive(Error, Debug)]
pub enum PsfError {
    /// The metadata store returned zero or several rows for one exposure.
    #[error("Expected exactly one QL record for {ql_root}, found {matches}")]
    MetadataLookup { ql_root: String, matches: usize },

    /// A metadata row for one exposure holds a NULL or unreadable value.
    #[error("Unreadable QL record for {ql_root}: {reason}")]
    InvalidMetadata { ql_root: String, reason: String },

    /// A `.stardb_xym` file could not be parsed; the whole file is skipped.
    #[error("Malformed record in {path} line {line}: {reason}")]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A row collided with a uniqueness constraint at insertion time.
    #[error("Record already in table: {0}")]
    DuplicateInsertion(String),

    /// A line of a focus-model text file did not match the expected layout.
    #[error("Invalid focus model line: {0}")]
    FocusModelParse(String),

    /// The focus interpolation window is unusable.
    #[error("Invalid focus window: {0}")]
    InvalidWindow(String),

    /// A FITS header could not be read or lacks the WCS keywords.
    #[error("Invalid WCS in {path}: {reason}")]
    Wcs { path: PathBuf, reason: String },

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The relational store rejected a statement or could not be reached.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PsfError {
    /// `true` for errors that should only skip the current item.
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            PsfError::MetadataLookup { .. }
                | PsfError::InvalidMetadata { .. }
                | PsfError::MalformedRecord { .. }
                | PsfError::DuplicateInsertion(_)
                | PsfError::FocusModelParse(_)
                | PsfError::Wcs { .. }
        )
    }
}

/// Convenience alias used throughout the pipeline crates.
pub type Result<T> = std::result::Result<T, PsfError>;
