use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PsfError, Result};
use crate::focus::FocusWindow;
use crate::reconcile::ReconcilePolicy;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

const LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

/// WFC3/IR PSF ingestion pipeline
#[derive(Parser, Debug, Clone)]
#[command(
    name = "irpsf",
    about = "WFC3/IR PSF ingestion pipeline",
    version
)]
pub struct Settings {
    /// Pipeline configuration file (defaults to ~/.irpsf/config.json)
    #[arg(long, env = "IRPSF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(
        long,
        default_value = "INFO",
        global = true,
        ignore_case = true,
        value_parser = PossibleValuesParser::new(LOG_LEVELS).map(|s| s.to_uppercase())
    )]
    pub log_level: String,

    /// Log file path (defaults to <log_dir>/<command>/<command>_<timestamp>.log)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline stages.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create one output directory per IR filter
    SetupDirs,

    /// Create or migrate the PSF database schema
    InitDb,

    /// Run hst1pass.e on every QL exposure without PSF outputs
    RunHst1pass {
        /// Filter to process, or "all"
        #[arg(long, default_value = "all")]
        filter: String,
    },

    /// Ingest hst1pass catalogs into the psf_mast table
    IngestPsf {
        /// Filter to process, or "all"
        #[arg(long, default_value = "all")]
        filter: String,

        /// Skip rootnames that already have rows in the database
        #[arg(long)]
        skip_existing: bool,

        /// Keep saturated stars
        #[arg(long)]
        include_saturated: bool,
    },

    /// Ingest the focus-model text files into the focus_model table
    IngestFocus,

    /// Write the rows of a new psf_mast dump missing from the last delivery
    Deliver {
        /// Most recently delivered psf_mast dump
        old_table: PathBuf,
        /// Latest psf_mast dump
        new_table: PathBuf,
    },

    /// Dump the psf_mast table to a text file
    Dump {
        /// Output path
        output: PathBuf,
    },

    /// Drop and recreate the psf_mast table
    Reset {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

impl Command {
    /// Short name used for per-command log directories.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetupDirs => "setup_dirs",
            Command::InitDb => "init_db",
            Command::RunHst1pass { .. } => "run_hst1pass",
            Command::IngestPsf { .. } => "ingest_psf",
            Command::IngestFocus => "ingest_focus",
            Command::Deliver { .. } => "deliver",
            Command::Dump { .. } => "dump",
            Command::Reset { .. } => "reset",
        }
    }
}

impl Settings {
    /// Parse the process arguments and apply `--debug`.
    pub fn load() -> Self {
        Self::load_from_args(std::env::args_os())
    }

    /// Same as [`Settings::load`] with an explicit argument list.
    pub fn load_from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut settings = Settings::parse_from(args);
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// Path of the pipeline configuration file to use.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(PipelineConfig::default_path)
    }

    /// Load the pipeline configuration and apply command-line overrides.
    pub fn resolve_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load_from(&self.config_path())?;
        if let Command::IngestPsf {
            skip_existing,
            include_saturated,
            ..
        } = &self.command
        {
            // Flags can only switch behaviour on.
            config.skip_existing |= *skip_existing;
            config.include_saturated |= *include_saturated;
        }
        config.validate()?;
        Ok(config)
    }
}

// ── PipelineConfig ─────────────────────────────────────────────────────────────

fn default_cores() -> usize {
    4
}

fn default_focus_window_minutes() -> f64 {
    6.0
}

fn default_focus_cadence_minutes() -> f64 {
    5.0
}

/// Site configuration kept out of the repository, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// SQLite file holding the `psf_mast` and `focus_model` tables.
    pub psf_database: PathBuf,
    /// SQLite file of the quicklook metadata database (read only).
    pub ql_database: PathBuf,
    /// Root directory for per-command log files.
    pub log_dir: PathBuf,
    /// Root of the per-filter hst1pass output directories.
    pub output_dir: PathBuf,
    /// Directory containing `hst1pass.e`.
    pub hst1pass_dir: PathBuf,
    /// Directory containing the `PSFSTD_WFC3IR_*.fits` library PSFs.
    pub psf_models: PathBuf,
    /// Directory containing the `*Focus*.txt` focus-model files.
    pub focus_models: PathBuf,
    /// Maximum number of concurrent hst1pass processes.
    #[serde(default = "default_cores")]
    pub cores: usize,
    /// Half-width of the focus interpolation window, minutes.
    #[serde(default = "default_focus_window_minutes")]
    pub focus_window_minutes: f64,
    /// Sampling cadence of the focus model, minutes.
    #[serde(default = "default_focus_cadence_minutes")]
    pub focus_cadence_minutes: f64,
    /// Exclude rootnames already present in `psf_mast` before ingesting.
    #[serde(default)]
    pub skip_existing: bool,
    /// Keep saturated stars when parsing catalogs.
    #[serde(default)]
    pub include_saturated: bool,
}

impl PipelineConfig {
    /// Default path: `~/.irpsf/config.json`.
    pub fn default_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Config path rooted at `base_dir`.
    pub fn config_path_in(base_dir: &Path) -> PathBuf {
        base_dir.join(".irpsf").join("config.json")
    }

    /// Load and parse the configuration at `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PsfError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| PsfError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Atomically write the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;

        // Write to a temp file then rename for atomicity.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.cores == 0 {
            return Err(PsfError::Config("cores must be at least 1".to_string()));
        }
        self.focus_window()
            .map_err(|e| PsfError::Config(e.to_string()))?;
        Ok(())
    }

    /// The focus interpolation window described by this configuration.
    pub fn focus_window(&self) -> Result<FocusWindow> {
        FocusWindow::from_minutes(self.focus_window_minutes, self.focus_cadence_minutes)
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            skip_existing: self.skip_existing,
        }
    }

    /// Output directory for one filter.
    pub fn filter_dir(&self, filter: &str) -> PathBuf {
        self.output_dir.join(filter)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
