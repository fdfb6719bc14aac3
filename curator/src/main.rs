//! curator - media organizer daemon and CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgGroup, Parser, Subcommand};
use curator_config::ConfigHandle;
use curator_core::MediaOrganizer;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "curator")]
#[command(about = "Watches download directories and publishes movies and episodes into a structured media library")]
struct Cli {
    /// Path to the INI configuration file
    #[arg(short, long, global = true, default_value = "config.ini")]
    config: PathBuf,

    /// Verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run in monitor mode until interrupted
    Run,

    /// Organize specific files or one directory, then exit
    #[command(group(ArgGroup::new("input").required(true).args(["file", "dir"])))]
    Organize {
        /// Files to organize
        #[arg(long, num_args = 1..)]
        file: Vec<PathBuf>,

        /// Directory to organize
        #[arg(long, conflicts_with = "file")]
        dir: Option<PathBuf>,

        /// Run lookups but write nothing to the ledger
        #[arg(long)]
        test: bool,
    },
}

/// Map the config file's log level spelling onto a tracing directive.
fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" | "WARN" => "warn",
        "ERROR" => "error",
        _ => "info",
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_directive(level)))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let initial_level = if cli.verbose { "DEBUG" } else { "INFO" };
    let (filter, filter_handle) = reload::Layer::new(build_filter(initial_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ConfigHandle::load(&cli.config) {
        Ok(handle) => Arc::new(handle),
        Err(err) => {
            error!(error = %err, config = %cli.config.display(), "configuration failed");
            return ExitCode::from(1);
        }
    };

    if !cli.verbose {
        let level = config.snapshot().log_level.clone();
        let _ = filter_handle.modify(|filter| *filter = build_filter(&level));
    }

    let mut organizer = match MediaOrganizer::new(Arc::clone(&config)).await {
        Ok(organizer) => organizer,
        Err(err) => {
            error!(error = %err, "initialization failed");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Command::Run => {
            if !cli.verbose {
                let handle = filter_handle.clone();
                organizer.set_log_level_setter(Arc::new(move |level: &str| {
                    let _ = handle.modify(|filter| *filter = build_filter(level));
                }));
            }

            match organizer.run().await {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    error!(error = %err, "monitor mode failed");
                    ExitCode::from(1)
                }
            }
        }
        Command::Organize { file, dir, test } => {
            if test {
                info!("test mode: the ledger will not be written");
            }

            let mut all_ok = true;
            for path in &file {
                match organizer.organize_single_file(path, test).await {
                    Ok(true) => {}
                    Ok(false) => all_ok = false,
                    Err(err) => {
                        error!(path = %path.display(), error = %err, "organization failed");
                        all_ok = false;
                    }
                }
            }

            if let Some(dir) = dir {
                match organizer.organize_directory(&dir, test).await {
                    Ok((_, 0)) => {}
                    Ok((_, _failed)) => all_ok = false,
                    Err(err) => {
                        error!(dir = %dir.display(), error = %err, "organization failed");
                        all_ok = false;
                    }
                }
            }

            if all_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
    }
}
