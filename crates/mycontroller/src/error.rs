//! Binary error type with miette diagnostics and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use mycontroller_config::ConfigError;
use mycontroller_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    /// The database was cleared by a restore that did not finish.
    pub const RESTORE_FATAL: i32 = 10;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(mycontroller::config),
        help("Check the config file (mycontroller config path) and MC_* environment variables.")
    )]
    Config(#[from] ConfigError),

    #[error("Configuration file already exists")]
    #[diagnostic(
        code(mycontroller::config_exists),
        help("Use --force to overwrite {path}")
    )]
    ConfigExists { path: String },

    // ── Core ─────────────────────────────────────────────────────────

    #[error("Restore failed after the database was cleared: {message}")]
    #[diagnostic(
        code(mycontroller::restore_fatal),
        help("Restore again from a known-good bundle before serving traffic.")
    )]
    RestoreFatal { message: String },

    #[error(transparent)]
    #[diagnostic(code(mycontroller::core))]
    Core(CoreError),

    // ── IO ───────────────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::RestoreFatal { message } => Self::RestoreFatal { message },
            other => Self::Core(other),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::ConfigExists { .. } => exit_code::CONFIG,
            Self::RestoreFatal { .. } => exit_code::RESTORE_FATAL,
            Self::Core(err) if err.is_not_found() => exit_code::NOT_FOUND,
            Self::Core(err) => match err.status_code() {
                400 => exit_code::USAGE,
                409 => exit_code::CONFLICT,
                _ => exit_code::GENERAL,
            },
            Self::Io(_) => exit_code::GENERAL,
        }
    }
}
