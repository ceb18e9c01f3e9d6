//! CLI entry point for stagectl.
//!
//! Subcommands cover the operator workflow end to end: run a motion
//! sequence (optionally looping and logging), home or reset the stages,
//! read positions, calibrate logical zero, regenerate the hardware
//! snapshot from the live controller, back up the controller's
//! configuration files, and print the motion-file format guide.
//!
//! Fatal configuration errors (missing or malformed files, blank
//! credentials) exit non-zero with an explanatory message before any
//! controller I/O is attempted. Ctrl-C during a run cancels the move in
//! progress and shuts the session down cleanly.

use clap::{Parser, Subcommand};
use stagectl::config::{HardwareMap, DEFAULT_CONFIG_DIR};
use stagectl::error::{MotionError, MotionResult};
use stagectl::sequence;
use stagectl::session::{self, MotionSession};
use stagectl::storage::PositionLog;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "stagectl")]
#[command(about = "Multi-axis motion stage control for Newport XPS controllers")]
struct Cli {
    /// Directory holding credentials.json and hardware.json.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Stages to operate on: comma-separated names or 1-based indices
    /// (default: all stages in the snapshot).
    #[arg(long, global = true)]
    stages: Option<String>,

    /// Log level when STAGECTL_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a motion sequence file.
    Run {
        /// Path to the motion file (one comma-separated configuration per line).
        #[arg(default_value = "motion.txt")]
        file: PathBuf,

        /// Restart from the first line after the last (Ctrl-C to stop).
        #[arg(long = "loop")]
        loop_mode: bool,

        /// Append confirmed positions to this CSV file.
        #[arg(long)]
        log: Option<PathBuf>,

        /// Skip group preparation (assumes a previous run left groups ready).
        #[arg(long)]
        skip_prep: bool,

        /// Re-home groups even if already referenced.
        #[arg(long)]
        force_home: bool,

        /// Allow moves on stages with no recorded zero offset.
        #[arg(long)]
        uncalibrated_ok: bool,
    },

    /// Initialize and home all groups (forces a fresh home search), then exit.
    Home,

    /// Move the selected stages to the configured reset position.
    Reset,

    /// Print current logical and physical positions of the selected stages.
    Positions,

    /// Record the current position of each selected stage as its logical zero.
    SetZero,

    /// Regenerate hardware.json from the live controller, then exit.
    GenerateConfig,

    /// Download system.ini and stages.ini from the controller, then exit.
    Backup {
        /// Output directory for the backup files.
        #[arg(long, default_value = "config_backup")]
        out: PathBuf,
    },

    /// Print the motion-file format guide and exit.
    FormatGuide,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = stagectl::tracing_setup::init(&cli.log_level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> MotionResult<()> {
    let Cli {
        config_dir,
        stages,
        log_level: _,
        command,
    } = cli;

    match command {
        Commands::FormatGuide => {
            // Works without any configuration; uses snapshot labels when
            // available.
            let labels = HardwareMap::load(&config_dir)
                .map(|map| map.labels())
                .unwrap_or_else(|_| vec!["Stage1".into(), "Stage2".into()]);
            sequence::print_format_guide(&labels);
            Ok(())
        }
        Commands::GenerateConfig => {
            let path = session::generate_snapshot(&config_dir).await?;
            println!(
                "hardware snapshot written to {}; re-run `stagectl set-zero` to calibrate",
                path.display()
            );
            Ok(())
        }
        Commands::Backup { out } => {
            session::backup_config(&config_dir, &out).await?;
            println!("controller configuration backed up to {}", out.display());
            Ok(())
        }
        Commands::Run {
            file,
            loop_mode,
            log,
            skip_prep,
            force_home,
            uncalibrated_ok,
        } => {
            let lines = sequence::load_motion_lines(&file)?;
            if lines.is_empty() {
                return Err(MotionError::ConfigMalformed(format!(
                    "no valid motion lines found in {}",
                    file.display()
                )));
            }

            let session = open_session(&config_dir, stages.as_deref()).await?;
            let mut options = session.default_options();
            options.skip_prep = skip_prep;
            options.force_home = force_home;
            options.uncalibrated_ok = uncalibrated_ok;

            let result = async {
                if !skip_prep {
                    session.prepare(force_home).await?;
                }
                let log = match log {
                    Some(path) => Some(PositionLog::open(&path)?),
                    None => None,
                };
                if loop_mode {
                    println!("looping through motion configurations (Ctrl-C to stop)");
                }
                let report = session.run_sequence(&lines, &options, loop_mode, log).await?;
                println!(
                    "sequence finished: {} executed, {} skipped",
                    report.executed, report.skipped
                );
                Ok(())
            }
            .await;
            finish(session, result).await
        }
        Commands::Home => {
            let session = open_session(&config_dir, stages.as_deref()).await?;
            let result = session.prepare(true).await;
            if result.is_ok() {
                println!("all groups initialized and homed");
            }
            finish(session, result).await
        }
        Commands::Reset => {
            let session = open_session(&config_dir, stages.as_deref()).await?;
            let result = async {
                session.prepare(false).await?;
                session.reset(&session.default_options()).await
            }
            .await;
            if result.is_ok() {
                println!("stages reset");
            }
            finish(session, result).await
        }
        Commands::Positions => {
            let session = open_session(&config_dir, stages.as_deref()).await?;
            let result = async {
                let snapshot = session.positions().await?;
                println!("current positions (logical / physical):");
                for entry in &snapshot.entries {
                    println!(
                        "  {}: {:.4} / {:.4}",
                        entry.stage, entry.logical, entry.physical
                    );
                }
                Ok(())
            }
            .await;
            finish(session, result).await
        }
        Commands::SetZero => {
            let session = open_session(&config_dir, stages.as_deref()).await?;
            let result = session.set_zero().await;
            if result.is_ok() {
                println!("zero offsets updated in the hardware snapshot");
            }
            finish(session, result).await
        }
    }
}

/// Connect a session with Ctrl-C wired to move cancellation.
async fn open_session(
    config_dir: &std::path::Path,
    stages: Option<&str>,
) -> MotionResult<MotionSession> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling motion");
            let _ = cancel_tx.send(true);
        }
    });
    MotionSession::connect(config_dir, stages, cancel_rx).await
}

/// Close the session and fold any teardown failure into the result.
async fn finish(session: MotionSession, result: MotionResult<()>) -> MotionResult<()> {
    let closed = session.close().await;
    result.and(closed)
}
