mod cli;
mod error;
mod server;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mycontroller_config as config;
use mycontroller_core::backup::{BackupEngine, schedule_restore};
use mycontroller_core::config::CoreConfig;

use crate::cli::{BackupCommand, Cli, Command, ConfigCommand, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_json);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Config(args) => config_cmd(&args.command, &cli.global),
        Command::Serve => {
            let core = core_config(&cli.global)?;
            server::serve(core).await
        }
        Command::Backup(args) => {
            let core = core_config(&cli.global)?;
            backup_cmd(args.command, core).await
        }
    }
}

fn config_file(global: &GlobalOpts) -> std::path::PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

fn core_config(global: &GlobalOpts) -> Result<CoreConfig, CliError> {
    let path = config_file(global);
    tracing::debug!(path = %path.display(), "loading configuration");
    let cfg = config::load_config(&path)?;
    Ok(config::to_core_config(&cfg)?)
}

fn config_cmd(command: &ConfigCommand, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config_file(global);
    match command {
        ConfigCommand::Path => println!("{}", path.display()),
        ConfigCommand::Show => {
            let cfg = config::load_config(&path)?;
            // Validate before printing so typos surface here, not at boot.
            config::to_core_config(&cfg)?;
            print!("{}", toml::to_string_pretty(&cfg).map_err(config::ConfigError::from)?);
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            config::save_config(&config::Config::default(), &path)?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

async fn backup_cmd(command: BackupCommand, core: CoreConfig) -> Result<(), CliError> {
    let ctx = server::offline_context(core).await?;
    let result = match command {
        BackupCommand::Export {
            dir,
            prefix,
            format,
        } => {
            let format = format.map_or(ctx.config.backup_format, Into::into);
            BackupEngine::new(Arc::clone(&ctx))
                .export(&dir, &prefix, format)
                .await
                .map(|exported| {
                    let rows: usize = exported.rows.values().sum();
                    println!("{} ({rows} rows)", exported.bundle.display());
                })
        }
        BackupCommand::Restore { bundle } => schedule_restore(&ctx, &bundle).await.map(|path| {
            println!("restore scheduled in {}", path.display());
            println!("it runs the next time the server starts");
        }),
    };
    server::close(&ctx).await;
    result.map_err(CliError::from)
}
