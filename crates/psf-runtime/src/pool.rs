//! Bounded worker pool running `hst1pass.e` over QL exposures.
//!
//! One job per exposure. Jobs run as child processes in the output
//! directory of their filter; at most `cores` run at once.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use psf_core::filters::psf_model_for;
use psf_core::models::QlRecord;
use psf_core::settings::PipelineConfig;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Name of the PSF-fitting executable inside `hst1pass_dir`.
pub const HST1PASS_EXECUTABLE: &str = "hst1pass.e";

/// Fixed hst1pass options preceding the `PSF=` argument.
const HST1PASS_OPTIONS: [&str; 3] = ["STARDB+", "HMIN=7", "FMIN=10000"];

// ── Jobs ──────────────────────────────────────────────────────────────────────

/// One external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hst1passJob {
    /// QL root of the image, for logging.
    pub ql_root: String,
    /// Working directory; hst1pass writes its outputs here.
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Build one job per QL record not already in `processed`.
///
/// Records whose filter has no library PSF are skipped with a warning.
pub fn build_jobs(
    config: &PipelineConfig,
    records: &[QlRecord],
    processed: &HashSet<String>,
) -> Vec<Hst1passJob> {
    let program = config.hst1pass_dir.join(HST1PASS_EXECUTABLE);
    let mut jobs = Vec::new();

    for record in records {
        if processed.contains(&record.ql_root) {
            debug!("{} already processed", record.ql_root);
            continue;
        }
        let Some(model) = psf_model_for(&record.filter) else {
            warn!(
                ql_root = %record.ql_root,
                filter = %record.filter,
                "No library PSF for filter; skipping"
            );
            continue;
        };

        let image = PathBuf::from(&record.directory).join(format!("{}q_flt.fits", record.ql_root));
        let mut args: Vec<String> = HST1PASS_OPTIONS.iter().map(|s| s.to_string()).collect();
        args.push(format!("PSF={}", config.psf_models.join(model).display()));
        args.push(image.display().to_string());

        jobs.push(Hst1passJob {
            ql_root: record.ql_root.clone(),
            cwd: config.filter_dir(&record.filter),
            program: program.clone(),
            args,
        });
    }

    info!(
        "{} hst1pass jobs from {} QL records",
        jobs.len(),
        records.len()
    );
    jobs
}

// ── Pool ──────────────────────────────────────────────────────────────────────

/// Outcome of [`run_jobs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub succeeded: usize,
    /// QL roots whose process exited non-zero or could not be started,
    /// sorted.
    pub failed: Vec<String>,
}

/// Run every job with at most `cores` processes alive at a time.
///
/// A failing job is logged and counted; it never stops the others.
pub async fn run_jobs(jobs: Vec<Hst1passJob>, cores: usize) -> PoolSummary {
    let total = jobs.len();
    let permits = Arc::new(Semaphore::new(cores.max(1)));
    let mut tasks = JoinSet::new();

    for job in jobs {
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            let ok = run_job(&job).await;
            (job.ql_root, ok)
        });
    }

    let mut summary = PoolSummary::default();
    let mut finished = 0;
    while let Some(joined) = tasks.join_next().await {
        finished += 1;
        match joined {
            Ok((_, true)) => summary.succeeded += 1,
            Ok((ql_root, false)) => summary.failed.push(ql_root),
            Err(e) => {
                warn!("hst1pass task panicked: {}", e);
                summary.failed.push(format!("task-{finished}"));
            }
        }
        debug!("{} of {} hst1pass jobs finished", finished, total);
    }
    summary.failed.sort();

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        "hst1pass pool finished"
    );
    summary
}

async fn run_job(job: &Hst1passJob) -> bool {
    debug!("Running {} {:?} in {}", job.program.display(), job.args, job.cwd.display());
    let status = Command::new(&job.program)
        .args(&job.args)
        .current_dir(&job.cwd)
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(s) if s.success() => {
            info!("hst1pass finished for {}", job.ql_root);
            true
        }
        Ok(s) => {
            warn!("hst1pass failed for {}: {}", job.ql_root, s);
            false
        }
        Err(e) => {
            warn!(
                "Could not start {} for {}: {}",
                job.program.display(),
                job.ql_root,
                e
            );
            false
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
