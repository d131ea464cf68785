use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::{Parser as ClapParser, Subcommand as ClapSubcommand};
use eyre::WrapErr;
use ferry_config::MigrationConfig;
use ferry_orchestrator::{MigrationReport, Migrator};
use tracing::{Level, info, warn};

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(name = "ferry", version, about = "Batch migration of work items between two tracking service instances")]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "FERRY_LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        global = true
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never",
        env = "FERRY_LOG_COLOR",
        global = true
    )]
    pub log_color: LogColor,
    #[arg(
        long = "log.dir",
        value_name = "LOG_DIR",
        help = "Directory to store log files.",
        env = "FERRY_LOG_DIR",
        global = true
    )]
    pub log_dir: Option<PathBuf>,
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    #[command(about = "Check the configuration and run the source query without writing anything")]
    Validate {
        #[arg(long = "config", value_name = "CONFIG_FILE", env = "FERRY_CONFIG")]
        config: PathBuf,
    },
    #[command(about = "Migrate every record selected by the source query")]
    Migrate {
        #[arg(long = "config", value_name = "CONFIG_FILE", env = "FERRY_CONFIG")]
        config: PathBuf,
        #[arg(
            long = "report",
            value_name = "REPORT_FILE",
            help = "Write the per-record report as JSON to this file."
        )]
        report: Option<PathBuf>,
    },
}

impl Subcommand {
    /// Returns `false` when the run finished but some records failed.
    pub async fn run(self) -> eyre::Result<bool> {
        match self {
            Subcommand::Validate { config } => {
                let migrator = Migrator::connect(load_config(&config)?)?;
                let ids = migrator.validate().await?;
                info!(records = ids.len(), "Configuration is valid");
                Ok(true)
            }
            Subcommand::Migrate { config, report } => {
                let migrator = Migrator::connect(load_config(&config)?)?;
                let run = migrator.migrate().await?;
                if let Some(path) = report {
                    write_report(&path, &run.report)?;
                }
                if run.report.has_failures() {
                    warn!(failed = run.report.totals.failed, "Some records were not migrated");
                }
                Ok(!run.report.has_failures())
            }
        }
    }
}

fn load_config(path: &Path) -> eyre::Result<MigrationConfig> {
    MigrationConfig::from_file(path)
        .wrap_err_with(|| format!("Failed to load configuration from {}", path.display()))
}

fn write_report(path: &Path, report: &MigrationReport) -> eyre::Result<()> {
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, json)
        .wrap_err_with(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "Report written");
    Ok(())
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!(
                "Invalid log color '{s}'. Expected: auto, always, or never"
            )),
        }
    }
}
