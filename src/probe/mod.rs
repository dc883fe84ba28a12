//! Input duration lookup, done once before the transcoder starts.
//!
//! A missing duration only disables percentage and ETA, so probes report
//! failure as `None` and log why.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration of `input` in seconds, if it can be determined.
    async fn duration(&self, input: &str) -> Option<f64>;
}

/// Asks `ffprobe` for the container duration.
#[derive(Debug, Clone)]
pub struct FfprobeDurationProbe {
    program: String,
}

impl Default for FfprobeDurationProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeDurationProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(input: &str) -> [&str; 7] {
        [
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
            input,
        ]
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Extract `format.duration` from ffprobe's JSON output.
pub fn parse_probe_output(json: &str) -> Option<f64> {
    let output: ProbeOutput = match serde_json::from_str(json) {
        Ok(output) => output,
        Err(e) => {
            debug!("Unreadable ffprobe output: {}", e);
            return None;
        }
    };
    let duration: f64 = output.format?.duration?.trim().parse().ok()?;
    (duration.is_finite() && duration > 0.0).then_some(duration)
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn duration(&self, input: &str) -> Option<f64> {
        let output = Command::new(&self.program)
            .args(Self::args(input))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("Unable to run {}: {}", self.program, e);
                return None;
            }
        };

        if !output.status.success() {
            warn!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        let duration = parse_probe_output(&String::from_utf8_lossy(&output.stdout));
        debug!("Probed duration of {}: {:?}", input, duration);
        duration
    }
}

/// A known duration, or a known absence of one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDuration(pub Option<f64>);

#[async_trait]
impl DurationProbe for FixedDuration {
    async fn duration(&self, _input: &str) -> Option<f64> {
        self.0
    }
}
