mod config;
mod coordinator;
mod data_dir;
mod eventlog;
mod install;
mod power;
mod process;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use config::WallkeeperConfig;
use coordinator::{ResumeTiming, WatchdogCoordinator, WatchdogTiming};
use data_dir::{DataDir, SingletonLock};
use eventlog::EventLog;
use process::{ProcessControl, ProcessController};

/// Keeps a desktop application running: restarts it when it crashes and
/// pauses it across system sleep, with a sleep-length-aware delay before
/// relaunching after wake.
#[derive(Parser, Debug)]
#[command(name = "wallkeeper", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "wallkeeper.toml")]
    config: PathBuf,

    /// Extra logging (liveness checks, delay decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Resolve config and the managed executable, print them, don't run
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy the binary into place and register it to start at login
    Install {
        /// Also start the watchdog immediately
        #[arg(long)]
        start: bool,
    },
    /// Remove the autostart registration and stop any running instance
    Uninstall,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = WallkeeperConfig::load_or_default(&cli.config)?;
    let data_dir = DataDir::new(&config.storage.data_dir);

    match cli.command {
        Some(Command::Install { start }) => {
            install::run_install(&data_dir, start)?;
            return Ok(());
        }
        Some(Command::Uninstall) => {
            install::run_uninstall(&data_dir)?;
            return Ok(());
        }
        None => {}
    }

    // Resolution failure is fatal: nothing to watch, no loop to start.
    let target = process::resolve(
        &config.app.candidate_paths,
        config.app.process_name.as_deref(),
    )?;
    println!(
        "watching {} (process name \"{}\")",
        target.path().display(),
        target.name_key()
    );

    if cli.dry_run {
        println!("dry run — config and managed executable resolved, not monitoring");
        return Ok(());
    }

    let _lock = SingletonLock::acquire(&data_dir.lock())?;
    let log = Arc::new(EventLog::open(&data_dir.event_log())?);
    log.record(&format!(
        "wallkeeper starting, watching {}",
        target.path().display()
    ));

    let controller = Arc::new(ProcessController::new(target, config.watchdog.stop_timeout()));
    let coordinator = WatchdogCoordinator::new(
        Arc::clone(&controller),
        WatchdogTiming::from_config(&config.watchdog),
        ResumeTiming::from_config(&config.resume),
        Arc::clone(&log),
    );

    // Without sleep/wake awareness the watchdog would relaunch into
    // half-initialized sessions, so a subscription failure is fatal.
    let events = power::subscribe()?;

    // Bring the managed process up before the first tick
    if controller.is_running() {
        println!("managed process already running");
    } else {
        match controller.start() {
            Ok(()) => {
                log.record("managed process started at watchdog startup");
                println!("managed process started");
            }
            Err(e) => {
                // The loop retries on its next tick
                tracing::error!(error = %e, "initial launch failed");
                log.record(&format!("initial launch failed: {e}"));
            }
        }
    }

    coordinator.start_monitoring();
    println!(
        "monitoring every {}s — Ctrl-C to stop",
        config.watchdog.check_interval_secs
    );

    tokio::select! {
        _ = power::run_pump(&coordinator, events) => {}
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("stopping watchdog...");
        }
    }

    coordinator.stop_monitoring().await;
    log.record("wallkeeper stopped");
    println!("watchdog stopped");
    Ok(())
}
