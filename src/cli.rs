use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::platform::Platform;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the services and converge host DNS
    Install(RunArgs),

    /// Update the installed services
    Update(RunArgs),

    /// Print the resolved step order without running anything
    Plan(PlanArgs),

    /// Validate the given YAML configuration
    Validate(ValidateArgs),

    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

impl Commands {
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Install(opts) | Self::Update(opts) => opts.log_level,
            Self::Plan(opts) => opts.log_level,
            Self::Validate(opts) => opts.log_level,
            Self::Completions(_) => LogLevel::Warn,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "svcdns.yaml")]
    pub file: Utf8PathBuf,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,

    /// Do not run, just show what would be done
    #[arg(long)]
    pub dry_run: bool,

    /// Target platform (defaults to the running OS)
    #[arg(long, value_enum)]
    pub platform: Option<Platform>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Which step set to resolve
    #[arg(value_enum, default_value = "install")]
    pub graph: GraphKind,

    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "svcdns.yaml")]
    pub file: Utf8PathBuf,

    /// Set the log level
    #[arg(short, long, default_value = "warn")]
    pub log_level: LogLevel,

    /// Target platform (defaults to the running OS)
    #[arg(long, value_enum)]
    pub platform: Option<Platform>,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the YAML file to validate
    #[arg(short, long, default_value = "svcdns.yaml")]
    pub file: Utf8PathBuf,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Step set selector for `plan`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum GraphKind {
    Install,
    Update,
}

/// Log verbosity, mapped onto `tracing` levels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
