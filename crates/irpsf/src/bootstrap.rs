use std::fs::{File, OpenOptions};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use psf_core::filters::IR_FILTERS;
use psf_core::settings::PipelineConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ── Directory bootstrap ────────────────────────────────────────────────────────

/// Ensure the log and output roots of the configuration exist.
pub fn ensure_directories(config: &PipelineConfig) -> anyhow::Result<()> {
    for dir in [&config.log_dir, &config.output_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }
    Ok(())
}

/// Create `<output_dir>/<filter>` for every IR filter. Returns the
/// directories that did not exist before.
pub fn setup_filter_dirs(config: &PipelineConfig) -> anyhow::Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    for filter in IR_FILTERS {
        let dir = config.filter_dir(filter);
        if !dir.is_dir() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
            created.push(dir);
        }
    }
    Ok(created)
}

// ── Logging bootstrap ──────────────────────────────────────────────────────────

/// Per-command log file: `<log_dir>/<command>/<command>_<YYYY-MM-DD-HH-MM>.log`.
pub fn command_log_path(log_dir: &Path, command: &str, now: NaiveDateTime) -> PathBuf {
    log_dir
        .join(command)
        .join(format!("{}_{}.log", command, now.format("%Y-%m-%d-%H-%M")))
}

/// Map the `--log-level` names onto an [`EnvFilter`] directive.
fn level_directive(log_level: &str) -> String {
    let upper = log_level.to_uppercase();
    let normalised = match upper.as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    };
    normalised.to_string()
}

/// Initialise the global `tracing` subscriber.
///
/// Events go to stderr and, when `log_file` is given, are appended to that
/// file as well (its directory is created on demand).
pub fn setup_logging(log_level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level_directive(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}

fn open_log_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))
}

/// Log file for this run: `--log-file`, else the per-command file under
/// the configured `log_dir`, else none.
pub fn resolve_log_file(
    explicit: Option<&Path>,
    config: Option<&PipelineConfig>,
    command: &str,
) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(|| {
        config.map(|c| command_log_path(&c.log_dir, command, Local::now().naive_local()))
    })
}

// ── Confirmation prompt ────────────────────────────────────────────────────────

/// Read answers from `input` until one is `y` or `n` (any case).
///
/// End of input counts as `n`.
pub fn confirm<R: BufRead>(mut input: R) -> std::io::Result<bool> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(false);
        }
        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => eprintln!("Please answer y or n."),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
