//! Clap derive structures for the `mycontroller` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use mycontroller_core::StorageFormat;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// mycontroller -- home-automation controller server
#[derive(Debug, Parser)]
#[command(
    name = "mycontroller",
    version,
    about = "Run and maintain a MyController server",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "MC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, env = "MC_LOG_JSON", global = true)]
    pub log_json: bool,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Boot the core and run until interrupted or asked to shut down
    Serve,

    /// Inspect or create the configuration file
    Config(ConfigArgs),

    /// Export a backup bundle or schedule a restore
    Backup(BackupArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved config file path
    Path,

    /// Print the effective configuration (file + environment)
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Export the last storage dump and tracked directories into a bundle
    Export {
        /// Directory receiving the bundle
        #[arg(long, short = 'd')]
        dir: PathBuf,

        /// Bundle name prefix
        #[arg(long, default_value = "mc_backup")]
        prefix: String,

        /// Dump format (defaults to `backup.format` from the config)
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },

    /// Schedule a restore of BUNDLE for the next server start
    Restore {
        bundle: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Json,
    Yaml,
}

impl From<FormatArg> for StorageFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => Self::Json,
            FormatArg::Yaml => Self::Yaml,
        }
    }
}
