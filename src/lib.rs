//! # ffprogress
//!
//! Run FFmpeg with a live progress bar, speed, ETA and estimated output size,
//! and stop the whole process tree cleanly when interrupted.
//!
//! ## Usage
//!
//! ```bash
//! ffprogress [-v] [--progress rich|simple|json] -- ffmpeg -i input.mkv -c:v libx264 output.mp4
//! ```
//!
//! ## Modules
//!
//! - `command` - Validated transcoder argument lists and progress protocol flags
//! - `progress` - Progress line parsing, metric aggregation and presenters
//! - `supervisor` - Process launch, stream draining and the poll loop
//! - `terminate` - Graceful-then-forced shutdown of a process tree
//! - `probe` - Input duration lookup via ffprobe
//! - `config` - TOML configuration with defaults
//! - `signal_handler` - Interrupt handling that feeds a cancellation token
//! - `cli` - Command-line front end
pub mod cli;
pub mod command;
pub mod config;
pub mod probe;
pub mod progress;
pub mod signal_handler;
pub mod supervisor;
pub mod terminate;

pub use command::{CommandError, LogLevel, ProgressFlags, TranscodeCommand};
pub use progress::{MetricsAggregator, ProgressMetrics};
pub use supervisor::{RunOutcome, Supervisor, SupervisorError, SupervisorOptions, SupervisorState};
pub use terminate::{Terminate, TerminationError, TerminationReport};
