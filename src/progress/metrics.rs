//! Derived progress metrics: percentage, ETA and estimated output size.

use super::parser::MetricUpdate;
use serde::Serialize;

/// Snapshot of the progress state. `None` means "unknown".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressMetrics {
    pub percentage: Option<f64>,
    pub seconds_processed: f64,
    pub speed: Option<f64>,
    pub eta_seconds: Option<f64>,
    pub estimated_final_size: Option<u64>,
}

/// Observer invoked synchronously after every update.
pub type MetricsCallback = Box<dyn FnMut(&ProgressMetrics) + Send>;

/// Single owner of the mutable progress state.
pub struct MetricsAggregator {
    total_duration: Option<f64>,
    current_size: Option<u64>,
    metrics: ProgressMetrics,
    callback: Option<MetricsCallback>,
}

impl MetricsAggregator {
    pub fn new(total_duration: Option<f64>) -> Self {
        // A zero or negative probe result is as good as no duration at all.
        let total_duration = total_duration.filter(|d| d.is_finite() && *d > 0.0);
        Self {
            total_duration,
            current_size: None,
            metrics: ProgressMetrics::default(),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: MetricsCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn total_duration(&self) -> Option<f64> {
        self.total_duration
    }

    pub fn metrics(&self) -> &ProgressMetrics {
        &self.metrics
    }

    pub fn update(&mut self, update: MetricUpdate) -> &ProgressMetrics {
        match update {
            MetricUpdate::TotalSize(bytes) => {
                self.current_size = Some(bytes);
            }
            MetricUpdate::Elapsed(secs) => self.apply_elapsed(secs),
            MetricUpdate::Speed(speed) => self.apply_speed(speed),
            MetricUpdate::End => self.apply_end(),
        }

        if let Some(callback) = self.callback.as_mut() {
            callback(&self.metrics);
        }
        &self.metrics
    }

    fn apply_elapsed(&mut self, secs: f64) {
        let secs = match self.total_duration {
            Some(total) => secs.clamp(0.0, total),
            None => secs.max(0.0),
        };
        self.metrics.seconds_processed = secs;

        let Some(total) = self.total_duration else {
            return;
        };
        let percentage = secs / total * 100.0;
        self.metrics.percentage = Some(percentage);

        if let Some(size) = self.current_size.filter(|size| *size > 0) {
            if percentage > 0.0 {
                self.metrics.estimated_final_size =
                    Some((size as f64 * (100.0 / percentage)).round() as u64);
            }
        }
    }

    fn apply_speed(&mut self, speed: f64) {
        // 0x is what a process reports before it has produced anything.
        if speed <= 0.0 {
            self.metrics.speed = None;
            return;
        }
        self.metrics.speed = Some(speed);

        if let Some(total) = self.total_duration {
            let remaining = (total - self.metrics.seconds_processed).max(0.0);
            self.metrics.eta_seconds = Some(remaining / speed);
        }
    }

    fn apply_end(&mut self) {
        let Some(total) = self.total_duration else {
            return;
        };
        self.metrics.seconds_processed = total;
        self.metrics.percentage = Some(100.0);
        self.metrics.eta_seconds = Some(0.0);
        if let Some(size) = self.current_size.filter(|size| *size > 0) {
            self.metrics.estimated_final_size = Some(size);
        }
    }
}
