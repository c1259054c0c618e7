//! livekey command-line front end.

mod cli;
mod commands;
mod config;
mod signal;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use livekey_ipc::ExtractionResult;

use crate::cli::{Cli, Command};
use crate::commands::{codes, exit_code, CommandError};
use crate::config::AppConfig;
use crate::signal::ShutdownFlag;

fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, config_path) = match AppConfig::load(cli.config.as_deref(), Path::new(".")) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(codes::CONFIG);
        }
    };

    init_logging(&config.logging.filter);
    match &config_path {
        Some(path) => debug!(path = %path.display(), "Loaded configuration"),
        None => debug!("No configuration file, using defaults"),
    }

    let shutdown = ShutdownFlag::new();

    let result = match &cli.command {
        Command::Interfaces => run_interfaces(&config),
        Command::Capture(args) => {
            commands::capture(&config, args, &shutdown).map(|found| print_result(&found))
        }
        Command::GoLive(args) => commands::go_live(&config, args, &shutdown).map(|found| {
            print_result(&found);
            info!("Broadcaster started");
        }),
        Command::WriteSettings(args) => commands::write_settings(&config, args)
            .map(|path| println!("Updated {}", path.display())),
    };

    match result {
        Ok(()) => ExitCode::from(codes::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run_interfaces(config: &AppConfig) -> Result<(), CommandError> {
    for (device, selected) in commands::interfaces(config)? {
        let marker = if selected { '*' } else { ' ' };
        println!("{marker} {:<40} {}", device.description, device.name);
    }
    Ok(())
}

fn print_result(result: &ExtractionResult) {
    println!("server: {}", result.server_url);
    println!("key: {}", result.stream_key);
    if let Some(endpoint) = &result.source_endpoint {
        println!("endpoint: {endpoint}");
    }
}
