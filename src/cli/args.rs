//! CLI argument structures

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::command::LogLevel;
use crate::config::Config;
use crate::progress::PresenterKind;

/// Run an FFmpeg command with live progress and clean shutdown
#[derive(Parser, Debug)]
#[command(name = "ffprogress")]
#[command(
    about = "ffprogress - Run FFmpeg with a progress bar, ETA and reliable cleanup",
    long_about = None
)]
#[command(version)]
#[command(after_help = "Example:\n  ffprogress -- ffmpeg -i input.mkv -c:v libx264 output.mp4")]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write FFmpeg's log output here instead of ffmpeg_output/[<input>].txt
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log level passed to FFmpeg
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub loglevel: Option<LogLevel>,

    /// How progress is displayed
    #[arg(long, value_enum, value_name = "MODE")]
    pub progress: Option<ProgressMode>,

    /// Wait at each shutdown step before escalating (e.g. "2s", "500ms")
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub termination_timeout: Option<Duration>,

    /// Input duration in seconds; skips probing with ffprobe
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<f64>,

    /// The FFmpeg command line, starting with the program
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "FFMPEG_COMMAND"
    )]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProgressMode {
    /// Progress bar with speed, ETA and size estimate
    Rich,
    /// Plain bar
    Simple,
    /// One JSON object per update on stdout
    Json,
}

impl Cli {
    /// Command-line flags take precedence over the config file.
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(loglevel) = self.loglevel {
            config.loglevel = loglevel;
        }
        match self.progress {
            Some(ProgressMode::Rich) => config.presenter = PresenterKind::Rich,
            Some(ProgressMode::Simple) => config.presenter = PresenterKind::Simple,
            Some(ProgressMode::Json) | None => {}
        }
        if let Some(timeout) = self.termination_timeout {
            config.termination_timeout = timeout;
        }
        config
    }

    pub fn json_progress(&self) -> bool {
        self.progress == Some(ProgressMode::Json)
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}
