//! Command-line front end: argument parsing, tracing setup and the run
//! entry point used by the binary.

pub mod args;

pub use args::{Cli, ProgressMode};

use anyhow::{Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::command::TranscodeCommand;
use crate::config::Config;
use crate::probe::{DurationProbe, FfprobeDurationProbe, FixedDuration};
use crate::signal_handler::install_cancel_handler;
use crate::supervisor::{LogSink, Supervisor};

/// Tracing filter for a `-v` count.
pub fn get_log_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize tracing on stderr so it never interleaves with JSON progress.
pub fn init_tracing(verbosity: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(get_log_level(verbosity))
        .with_writer(std::io::stderr)
        .with_target(verbosity >= 2)
        .with_thread_ids(verbosity >= 3)
        .with_line_number(verbosity >= 3)
        .init();
}

/// Run the command described by `cli` and return the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let config = cli.apply_overrides(config);
    trace!("Effective configuration: {:?}", config);

    let command = TranscodeCommand::parse(cli.command.iter().cloned())
        .context("Invalid FFmpeg command")?
        .with_progress(config.progress_flags());

    let cancel = CancellationToken::new();
    install_cancel_handler(cancel.clone()).context("Failed to install signal handlers")?;

    let probe: Box<dyn DurationProbe> = match cli.duration {
        Some(seconds) => Box::new(FixedDuration(Some(seconds).filter(|s| *s > 0.0))),
        None => Box::new(FfprobeDurationProbe::new(config.ffprobe.clone())),
    };
    let duration = probe.duration(command.input()).await;
    if duration.is_none() {
        eprintln!(
            "Could not determine the duration of {}, so improved progress stats will not be shown.",
            command.input_name()
        );
    }

    let log_file = cli
        .log_file
        .clone()
        .unwrap_or_else(|| LogSink::default_path(&config.log_dir, &command));
    debug!("Logging FFmpeg output to {}", log_file.display());

    let mut supervisor = Supervisor::new(command, config.supervisor_options())
        .with_duration(duration)
        .with_log_file(log_file);

    if cli.json_progress() {
        supervisor = supervisor.on_progress(|percentage, speed, eta_seconds, estimated_size| {
            println!(
                "{}",
                json!({
                    "percentage": percentage,
                    "speed": speed,
                    "eta_seconds": eta_seconds,
                    "estimated_final_size": estimated_size,
                })
            );
        });
    }

    let outcome = supervisor.run(cancel).await?;
    debug!("Run finished: {}", outcome.state());
    Ok(outcome.exit_code())
}
