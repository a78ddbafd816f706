//! PSF ingestion: hst1pass catalogs into `psf_mast`.
//!
//! For every filter directory the on-disk rootnames are reconciled against
//! the QL metadata, then each eligible rootname is turned into one row per
//! detected source with sky position and focus attached.

use std::path::Path;

use chrono::NaiveDateTime;
use psf_core::error::{PsfError, Result};
use psf_core::focus::FocusWindow;
use psf_core::models::{ql_root, PsfRecord};
use psf_core::reconcile::find_new_eligible_records;
use psf_core::settings::PipelineConfig;
use psf_data::discovery::{filter_dirs, find_flt_image, rootnames_in_filter_dir, xym_path};
use psf_data::reader::read_xym_file;
use psf_data::wcs::{SkyProjection, TanProjection};
use psf_store::{PsfDatabase, QuicklookDatabase};
use tracing::{debug, info, warn};

// ── Summaries ─────────────────────────────────────────────────────────────────

/// Counts for one rootname.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootnameCounts {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Counts for one filter directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSummary {
    pub filter: String,
    pub discovered: usize,
    pub eligible: usize,
    pub proprietary: usize,
    pub lookup_failures: usize,
    /// Rootnames skipped after reconciliation (missing image, bad catalog, ...).
    pub skipped: Vec<String>,
    pub inserted: usize,
    pub duplicates: usize,
}

// ── PsfIngestor ───────────────────────────────────────────────────────────────

/// Ingests hst1pass catalogs using the two databases it borrows.
///
/// `P` loads the sky projection of a calibrated image; [`PsfIngestor::new`]
/// reads it from the image's FITS header.
pub struct PsfIngestor<'a, P> {
    config: &'a PipelineConfig,
    psf_db: &'a PsfDatabase,
    ql_db: &'a QuicklookDatabase,
    window: FocusWindow,
    load_projection: P,
}

impl<'a> PsfIngestor<'a, fn(&Path) -> Result<TanProjection>> {
    pub fn new(
        config: &'a PipelineConfig,
        psf_db: &'a PsfDatabase,
        ql_db: &'a QuicklookDatabase,
    ) -> Result<Self> {
        Self::with_projection(config, psf_db, ql_db, TanProjection::from_fits)
    }
}

impl<'a, P, S> PsfIngestor<'a, P>
where
    P: Fn(&Path) -> Result<S>,
    S: SkyProjection,
{
    pub fn with_projection(
        config: &'a PipelineConfig,
        psf_db: &'a PsfDatabase,
        ql_db: &'a QuicklookDatabase,
        load_projection: P,
    ) -> Result<Self> {
        Ok(Self {
            config,
            psf_db,
            ql_db,
            window: config.focus_window()?,
            load_projection,
        })
    }

    /// Ingest one filter, or every `F*` directory under `output_dir` when
    /// `filter` is `None`.
    pub fn run(&self, filter: Option<&str>, now: NaiveDateTime) -> Result<Vec<FilterSummary>> {
        let filters = match filter {
            Some(f) => vec![f.to_string()],
            None => filter_dirs(&self.config.output_dir),
        };

        let mut summaries = Vec::with_capacity(filters.len());
        for filter in filters {
            summaries.push(self.ingest_filter(&filter, now)?);
        }
        Ok(summaries)
    }

    /// Ingest every new, public rootname of one filter directory.
    ///
    /// Only database failures abort; a rootname that cannot be processed is
    /// logged and skipped.
    pub fn ingest_filter(&self, filter: &str, now: NaiveDateTime) -> Result<FilterSummary> {
        info!("Processing filter {}", filter);
        let filter_dir = self.config.filter_dir(filter);
        let local = rootnames_in_filter_dir(&filter_dir);

        let policy = self.config.reconcile_policy();
        let ingested = if policy.skip_existing {
            self.psf_db.ingested_rootnames()?
        } else {
            Default::default()
        };
        let reconciliation = find_new_eligible_records(&local, &ingested, self.ql_db, now, policy)?;

        let mut summary = FilterSummary {
            filter: filter.to_string(),
            discovered: local.len(),
            eligible: reconciliation.eligible.len(),
            proprietary: reconciliation.proprietary.len(),
            lookup_failures: reconciliation.failed.len(),
            ..Default::default()
        };

        for rootname in &reconciliation.eligible {
            match self.ingest_rootname(&filter_dir, rootname) {
                Ok(counts) => {
                    summary.inserted += counts.inserted;
                    summary.duplicates += counts.duplicates;
                }
                Err(err) if is_skippable(&err) => {
                    warn!(rootname = %rootname, error = %err, "skipping rootname");
                    summary.skipped.push(rootname.clone());
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            filter = %summary.filter,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            skipped = summary.skipped.len(),
            "Filter ingested"
        );
        Ok(summary)
    }

    /// Insert one row per kept source of `rootname`'s catalog.
    pub fn ingest_rootname(&self, filter_dir: &Path, rootname: &str) -> Result<RootnameCounts> {
        let meta = self.ql_db.exposure_metadata(ql_root(rootname))?;

        let catalog = read_xym_file(&xym_path(filter_dir, rootname), self.config.include_saturated)?;
        if catalog.is_empty() {
            return Ok(RootnameCounts::default());
        }

        let image_dir = Path::new(&meta.directory);
        let image = find_flt_image(image_dir, rootname).ok_or_else(|| PsfError::Wcs {
            path: image_dir.to_path_buf(),
            reason: format!("no {rootname}*flt.fits image"),
        })?;
        let projection = (self.load_projection)(&image)?;

        let midexp = meta.midexp();
        let focus = self.window.estimate(midexp, self.psf_db)?;
        if focus.is_none() {
            debug!("No focus model samples around MJD {:.5} for {}", midexp, rootname);
        }

        let mut counts = RootnameCounts::default();
        for source in &catalog.sources {
            let sky = projection.pixel_to_sky(source.x, source.y);
            let record = PsfRecord::from_source(rootname, source, sky, &meta, focus.as_ref());
            match self.psf_db.insert_psf_record(&record) {
                Ok(_) => counts.inserted += 1,
                Err(PsfError::DuplicateInsertion(what)) => {
                    debug!("Record already in table: {}", what);
                    counts.duplicates += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if counts.duplicates > 0 {
            info!("{} duplicate rows skipped for {}", counts.duplicates, rootname);
        }
        Ok(counts)
    }
}

/// Errors that only cost the current rootname.
fn is_skippable(err: &PsfError) -> bool {
    err.is_per_item() || matches!(err, PsfError::FileRead { .. })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
