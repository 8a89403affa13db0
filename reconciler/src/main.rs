//! rootsync - Entry Point
//!
//! Reconciles a web root with a git repository: clone, pull or reset,
//! degrade to a placeholder page when nothing works, then normalize
//! ownership and restart the web server.

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use rootsync::app::options::AppOptions;
use rootsync::app::report::print_error;
use rootsync::app::run;
use rootsync::cli::{Cli, Commands, TargetArgs};
use rootsync::errors::DeployError;
use rootsync::filesys::file::File;
use rootsync::logs::{init_logging, LogLevel, LogOptions};
use rootsync::storage::layout::StorageLayout;
use rootsync::storage::settings::Settings;
use rootsync::utils::version_info;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = if matches!(cli.command, Commands::Version) {
        print_version()
    } else {
        run_cli(cli).await
    };
    std::process::exit(code);
}

fn print_version() -> i32 {
    match serde_json::to_string_pretty(&version_info()) {
        Ok(version) => {
            println!("{}", version);
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    }
}

async fn run_cli(cli: Cli) -> i32 {
    let settings_file = cli
        .config
        .clone()
        .map(File::new)
        .unwrap_or_else(|| StorageLayout::default().settings_file());

    let (args, force_init) = match &cli.command {
        Commands::Deploy(args)
        | Commands::Plan(args)
        | Commands::Probe(args)
        | Commands::Unlock(args) => (args.clone(), None),
        Commands::Init { force, target } => (target.clone(), Some(*force)),
        Commands::Version => (TargetArgs::default(), None),
    };

    let mut settings = match load_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return DeployError::ConfigError(e.to_string()).exit_code();
        }
    };
    args.apply(&mut settings);

    if let Some(force) = force_init {
        return init_settings(&settings_file, &settings, force).await;
    }

    if let Some(level) = &cli.log_level {
        match level.parse::<LogLevel>() {
            Ok(level) => settings.log_level = level,
            Err(e) => eprintln!("Ignoring --log-level: {}", e),
        }
    }

    // Keep the handle alive until the run has finished writing logs
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log.file.then(|| settings.log.dir.clone().into()),
        json_format: settings.log.json,
        ..Default::default()
    };
    let log_handle = match init_logging(log_options) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    if let Err(e) = settings.validate() {
        print_error(&e, cli.json);
        return e.exit_code();
    }

    let log_file = log_handle.as_ref().and_then(|h| h.file.as_deref());
    let options = AppOptions::from_settings(&settings, log_file);
    info!("rootsync {} targeting {}", version_info().version, options.target);

    let result = match &cli.command {
        Commands::Deploy(_) => run::deploy(&options, await_shutdown_signal(), cli.json)
            .await
            .map(|_| ()),
        Commands::Plan(_) => run::plan(&options, cli.json).await.map(|_| ()),
        Commands::Probe(_) => run::probe(&options, cli.json).await.map(|_| ()),
        Commands::Unlock(_) => run::unlock(&options).await,
        Commands::Init { .. } | Commands::Version => Ok(()),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            print_error(&e, cli.json);
            e.exit_code()
        }
    }
}

/// Read the settings file, falling back to defaults when it does not exist
async fn load_settings(file: &File) -> anyhow::Result<Settings> {
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>()
        .await
        .with_context(|| format!("unable to read settings from {:?}", file.path()))
}

async fn init_settings(file: &File, settings: &Settings, force: bool) -> i32 {
    if file.exists().await && !force {
        eprintln!(
            "error: {:?} already exists (use --force to overwrite)",
            file.path()
        );
        return DeployError::ConfigError("settings file exists".to_string()).exit_code();
    }
    match file.write_json(settings).await {
        Ok(()) => {
            println!("Settings written to {:?}", file.path());
            0
        }
        Err(e) => {
            eprintln!("error: unable to write {:?}: {}", file.path(), e);
            e.exit_code()
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        warn!("SIGTERM received, aborting run...");
                    }
                    _ = sigint.recv() => {
                        warn!("SIGINT received, aborting run...");
                    }
                }
            }
            _ => await_ctrl_c().await,
        }
    }

    #[cfg(not(unix))]
    await_ctrl_c().await;
}

async fn await_ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handling available; never cancel
        std::future::pending::<()>().await;
    }
    warn!("Ctrl+C received, aborting run...");
}
