//! Collection of diagnostic-channel lines and the failure keyword scan.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ExitOutcome;

static FAILURE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)error|failed|invalid|no such file|permission denied|not found|unable to|could not|cannot",
    )
    .expect("Invalid regex pattern")
});

/// Whether a diagnostic line looks like it explains a failure.
pub fn is_failure_line(line: &str) -> bool {
    FAILURE_PATTERN.is_match(line)
}

/// Accumulates diagnostic lines in arrival order.
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    lines: Vec<String>,
    error_lines: Vec<String>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a line; returns true if it matched the failure scan.
    pub fn record(&mut self, line: &str) -> bool {
        if line.is_empty() {
            return false;
        }
        let failure = is_failure_line(line);
        if failure {
            self.error_lines.push(line.to_string());
        }
        self.lines.push(line.to_string());
        failure
    }

    pub fn error_count(&self) -> usize {
        self.error_lines.len()
    }

    pub fn finish(self, return_code: i32) -> ExitOutcome {
        ExitOutcome {
            return_code,
            diagnostic_lines: self.lines,
            error_lines: self.error_lines,
        }
    }
}
