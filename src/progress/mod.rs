//! Progress telemetry: wire parsing, metric aggregation and display.

pub mod metrics;
pub mod parser;
pub mod presenter;

pub use metrics::{MetricsAggregator, MetricsCallback, ProgressMetrics};
pub use parser::{parse_elapsed, parse_progress_line, parse_speed, MetricUpdate};
pub use presenter::{
    build_presenter, Completion, PresenterKind, ProgressPresenter, RichPresenter, SimplePresenter,
};
