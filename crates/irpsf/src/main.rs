mod bootstrap;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use psf_core::filters::parse_filter_arg;
use psf_core::settings::{Command, PipelineConfig, Settings};
use psf_data::deliverable::{make_mast_deliverable, write_dump};
use psf_data::discovery::processed_ql_roots;
use psf_runtime::focus_ingest::ingest_focus_models;
use psf_runtime::ingest::PsfIngestor;
use psf_runtime::pool::{build_jobs, run_jobs};
use psf_store::{PsfDatabase, QuicklookDatabase, CURRENT_SCHEMA_VERSION};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();
    let command = settings.command.clone();

    // `deliver` works on plain files and runs without a configuration.
    let config = settings.resolve_config();
    let log_file = bootstrap::resolve_log_file(
        settings.log_file.as_deref(),
        config.as_ref().ok(),
        command.name(),
    );
    bootstrap::setup_logging(&settings.log_level, log_file.as_deref())?;

    info!("irpsf v{} starting {}", env!("CARGO_PKG_VERSION"), command.name());
    if let Some(path) = &log_file {
        info!("Logging to {}", path.display());
    }

    match command {
        Command::Deliver {
            old_table,
            new_table,
        } => deliver(&old_table, &new_table),
        command => {
            let config = config.with_context(|| {
                format!(
                    "cannot load configuration {}",
                    settings.config_path().display()
                )
            })?;
            bootstrap::ensure_directories(&config)?;
            run(command, &config).await
        }
    }
}

/// Run a subcommand that needs the pipeline configuration.
async fn run(command: Command, config: &PipelineConfig) -> Result<()> {
    match command {
        Command::SetupDirs => {
            let created = bootstrap::setup_filter_dirs(config)?;
            info!(
                "{} filter directories created under {}",
                created.len(),
                config.output_dir.display()
            );
        }

        Command::InitDb => {
            let db = PsfDatabase::open(&config.psf_database)?;
            db.close()?;
            info!(
                "PSF database {} at schema version {}",
                config.psf_database.display(),
                CURRENT_SCHEMA_VERSION
            );
        }

        Command::RunHst1pass { filter } => {
            let ql = QuicklookDatabase::open(&config.ql_database)?;
            let records = ql.ir_exposures(parse_filter_arg(&filter).as_deref())?;
            ql.close()?;

            let processed = processed_ql_roots(&config.output_dir);
            let jobs = build_jobs(config, &records, &processed);
            let summary = run_jobs(jobs, config.cores).await;
            for ql_root in &summary.failed {
                warn!("hst1pass did not complete for {}", ql_root);
            }
            info!(
                "hst1pass: {} succeeded, {} failed",
                summary.succeeded,
                summary.failed.len()
            );
        }

        Command::IngestPsf { filter, .. } => {
            let psf_db = PsfDatabase::open(&config.psf_database)?;
            let ql_db = QuicklookDatabase::open(&config.ql_database)?;
            let ingestor = PsfIngestor::new(config, &psf_db, &ql_db)?;
            let now = Utc::now().naive_utc();
            let summaries = ingestor.run(parse_filter_arg(&filter).as_deref(), now)?;

            let inserted: usize = summaries.iter().map(|s| s.inserted).sum();
            let duplicates: usize = summaries.iter().map(|s| s.duplicates).sum();
            info!(
                "{} filters processed, {} rows inserted, {} duplicates",
                summaries.len(),
                inserted,
                duplicates
            );
        }

        Command::IngestFocus => {
            let db = PsfDatabase::open(&config.psf_database)?;
            let summary = ingest_focus_models(&db, &config.focus_models)?;
            info!(
                "{} focus rows inserted from {} files",
                summary.inserted, summary.files
            );
        }

        Command::Dump { output } => {
            let db = PsfDatabase::open(&config.psf_database)?;
            let rows = db.all_psf_records()?;
            write_dump(&output, &rows)?;
        }

        Command::Reset { yes } => reset(config, yes)?,

        Command::Deliver {
            old_table,
            new_table,
        } => deliver(&old_table, &new_table)?,
    }

    Ok(())
}

fn deliver(old_table: &Path, new_table: &Path) -> Result<()> {
    let report = make_mast_deliverable(old_table, new_table)?;
    info!(
        "{} of {} rows delivered to {}",
        report.delivered,
        report.new_rows,
        report.output.display()
    );
    Ok(())
}

fn reset(config: &PipelineConfig, yes: bool) -> Result<()> {
    if !yes {
        eprintln!(
            "About to reset the psf_mast table of {}. Do you wish to proceed? (y/n)",
            config.psf_database.display()
        );
        if !bootstrap::confirm(std::io::stdin().lock())? {
            info!("Reset cancelled");
            return Ok(());
        }
    }

    let mut db = PsfDatabase::open(&config.psf_database)?;
    info!("Resetting psf_mast in {}", config.psf_database.display());
    db.reset_psf_table()?;
    Ok(())
}
