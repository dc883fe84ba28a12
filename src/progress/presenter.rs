//! Terminal display of progress metrics: a rich bar or spinner, or plain lines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::{Deserialize, Serialize};

use super::metrics::ProgressMetrics;

/// Bar positions are tracked in milliseconds of processed input.
const POSITION_SCALE: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PresenterKind {
    #[default]
    Rich,
    Simple,
}

/// How a run ended, as far as the display is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Failed { return_code: i32 },
    Terminated,
}

/// Renders progress metrics for a single run.
pub trait ProgressPresenter: Send {
    fn render(&mut self, metrics: &ProgressMetrics);

    /// Called exactly once with the terminal state.
    fn complete(&mut self, completion: &Completion);
}

pub fn build_presenter(
    kind: PresenterKind,
    label: &str,
    total_duration: Option<f64>,
    log_file: &Path,
) -> Box<dyn ProgressPresenter> {
    match kind {
        PresenterKind::Rich => Box::new(RichPresenter::new(label, total_duration, log_file)),
        PresenterKind::Simple => Box::new(SimplePresenter::new(label, total_duration, log_file)),
    }
}

/// Colored bar with speed, ETA and size estimate; spinner when the duration
/// is unknown.
pub struct RichPresenter {
    bar: ProgressBar,
    label: String,
    log_file: PathBuf,
    determinate: bool,
}

impl RichPresenter {
    pub fn new(label: &str, total_duration: Option<f64>, log_file: &Path) -> Self {
        Self::with_draw_target(label, total_duration, log_file, ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(
        label: &str,
        total_duration: Option<f64>,
        log_file: &Path,
        target: ProgressDrawTarget,
    ) -> Self {
        let bar = match total_duration {
            Some(total) => {
                let bar = ProgressBar::with_draw_target(Some(to_position(total)), target);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {msg} [{elapsed_precise}]",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
                );
                bar
            }
            None => {
                let bar = ProgressBar::with_draw_target(None, target);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.blue} {prefix:.bold} {msg} [{elapsed_precise}]",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };
        bar.set_prefix(format!("Processing {label}"));
        bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            bar,
            label: label.to_string(),
            log_file: log_file.to_path_buf(),
            determinate: total_duration.is_some(),
        }
    }
}

impl ProgressPresenter for RichPresenter {
    fn render(&mut self, metrics: &ProgressMetrics) {
        self.bar.set_position(to_position(metrics.seconds_processed));

        let mut parts = Vec::with_capacity(4);
        if self.determinate {
            parts.push(format_percentage(metrics.percentage));
        } else {
            parts.push(format!("{:.1}s processed", metrics.seconds_processed));
        }
        parts.push(format_speed(metrics.speed));
        if self.determinate {
            parts.push(format!("ETA {}", format_eta(metrics.eta_seconds)));
        }
        if let Some(size) = metrics.estimated_final_size {
            parts.push(format!("~{}", humanize_bytes(size)));
        }
        self.bar.set_message(parts.join(" | "));
    }

    fn complete(&mut self, completion: &Completion) {
        match completion {
            Completion::Succeeded => {
                if let Some(len) = self.bar.length() {
                    self.bar.set_position(len);
                }
                self.bar.set_prefix(format!("✓ Processed {}", self.label));
                self.bar.finish_with_message("");
            }
            Completion::Failed { return_code } => {
                self.bar.abandon_with_message(format!(
                    "Process failed (exit code {return_code}). Check {} for details.",
                    self.log_file.display()
                ));
            }
            Completion::Terminated => {
                self.bar.abandon_with_message("Process terminated.");
            }
        }
    }
}

/// Plain ASCII bar redrawn at most twice a second.
pub struct SimplePresenter {
    bar: Option<ProgressBar>,
    label: String,
    log_file: PathBuf,
}

impl SimplePresenter {
    pub fn new(label: &str, total_duration: Option<f64>, log_file: &Path) -> Self {
        Self::with_draw_target(
            label,
            total_duration,
            log_file,
            ProgressDrawTarget::stderr_with_hz(2),
        )
    }

    pub fn with_draw_target(
        label: &str,
        total_duration: Option<f64>,
        log_file: &Path,
        target: ProgressDrawTarget,
    ) -> Self {
        let bar = match total_duration {
            Some(total) => {
                let bar = ProgressBar::with_draw_target(Some(to_position(total)), target);
                bar.set_style(
                    ProgressStyle::with_template("{prefix} {wide_bar} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                );
                bar.set_prefix(format!("Processing {label}"));
                Some(bar)
            }
            None => {
                eprintln!("Processing {label}...");
                None
            }
        };

        Self {
            bar,
            label: label.to_string(),
            log_file: log_file.to_path_buf(),
        }
    }
}

impl ProgressPresenter for SimplePresenter {
    fn render(&mut self, metrics: &ProgressMetrics) {
        let Some(bar) = &self.bar else {
            return;
        };
        bar.set_position(to_position(metrics.seconds_processed));
        bar.set_message(format!(
            "{} [{}, ETA {}]",
            format_percentage(metrics.percentage),
            format_speed(metrics.speed),
            format_eta(metrics.eta_seconds)
        ));
    }

    fn complete(&mut self, completion: &Completion) {
        let message = match completion {
            Completion::Succeeded => format!("✓ Processed {}", self.label),
            Completion::Failed { return_code } => format!(
                "Process failed (exit code {return_code}). Check {} for details.",
                self.log_file.display()
            ),
            Completion::Terminated => "Process terminated.".to_string(),
        };

        match self.bar.take() {
            Some(bar) if *completion == Completion::Succeeded => {
                if let Some(len) = bar.length() {
                    bar.set_position(len);
                }
                bar.set_prefix(message);
                bar.finish_with_message("");
            }
            Some(bar) => {
                bar.abandon();
                eprintln!("{message}");
            }
            None => eprintln!("{message}"),
        }
    }
}

fn to_position(secs: f64) -> u64 {
    (secs.max(0.0) * POSITION_SCALE).round() as u64
}

pub fn format_percentage(percentage: Option<f64>) -> String {
    match percentage {
        Some(pct) => format!("{pct:.1}%"),
        None => "unknown%".to_string(),
    }
}

pub fn format_speed(speed: Option<f64>) -> String {
    match speed {
        Some(speed) => format!("{speed}x"),
        None => "unknown speed".to_string(),
    }
}

pub fn format_eta(eta: Option<f64>) -> String {
    let Some(eta) = eta else {
        return "unknown".to_string();
    };
    let total_secs = eta.max(0.0).round() as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}

pub fn humanize_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1000.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
