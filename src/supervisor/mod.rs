//! Runs one transcoder invocation to a terminal state.
//!
//! Two reader tasks drain the child's stdout (progress telemetry) and stderr
//! (diagnostics) into separate queues. A single poll loop pulls whatever is
//! available from both, updates metrics, and checks for exit or cancellation
//! between short sleeps. Nothing ever blocks on one channel while the other
//! fills up.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Child;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::command::TranscodeCommand;
use crate::progress::{
    build_presenter, parse_progress_line, Completion, MetricsAggregator, PresenterKind,
    ProgressMetrics, ProgressPresenter,
};
use crate::terminate::{PlatformTerminator, Terminate, TerminationError, TerminationReport};

pub mod diagnostics;
mod launch;
pub mod log_sink;
pub mod reader;

#[cfg(all(test, unix))]
mod tests;

pub use diagnostics::DiagnosticCollector;
pub use log_sink::{LogSink, DEFAULT_LOG_DIR};
pub use reader::{spawn_line_reader, StreamSource};

/// Exit code reported for a run stopped on request.
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// `(percentage, speed, eta_seconds, estimated_size_bytes)` on every update.
pub type ProgressCallback =
    Box<dyn FnMut(Option<f64>, Option<f64>, Option<f64>, Option<u64>) + Send>;

/// Zero-argument success or failure hook.
pub type OutcomeHandler = Box<dyn FnOnce() + Send>;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Child process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("Failed to wait for the child process: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to open log file {path}: {source}")]
    LogSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Termination(#[from] TerminationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    TerminatedByRequest,
}

impl SupervisorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TerminatedByRequest)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TerminatedByRequest => "terminated_by_request",
        };
        f.write_str(name)
    }
}

/// What the child left behind when it exited on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitOutcome {
    pub return_code: i32,
    /// Every diagnostic line, in arrival order.
    pub diagnostic_lines: Vec<String>,
    /// The subset that matched the failure keyword scan.
    pub error_lines: Vec<String>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Succeeded(ExitOutcome),
    Failed(ExitOutcome),
    TerminatedByRequest(TerminationReport),
}

impl RunOutcome {
    pub fn state(&self) -> SupervisorState {
        match self {
            Self::Succeeded(_) => SupervisorState::Succeeded,
            Self::Failed(_) => SupervisorState::Failed,
            Self::TerminatedByRequest(_) => SupervisorState::TerminatedByRequest,
        }
    }

    /// Process exit code a wrapper should report for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded(_) => 0,
            Self::Failed(exit) if exit.return_code == 0 => 1,
            Self::Failed(exit) => exit.return_code,
            Self::TerminatedByRequest(_) => CANCELLED_EXIT_CODE,
        }
    }

    pub fn exit(&self) -> Option<&ExitOutcome> {
        match self {
            Self::Succeeded(exit) | Self::Failed(exit) => Some(exit),
            Self::TerminatedByRequest(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Sleep between poll ticks.
    pub poll_interval: Duration,
    /// Wait at each escalation step during termination.
    pub termination_timeout: Duration,
    /// Upper bound on joining the readers after exit.
    pub drain_timeout: Duration,
    pub presenter: PresenterKind,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            termination_timeout: crate::terminate::DEFAULT_TERMINATION_TIMEOUT,
            drain_timeout: Duration::from_secs(2),
            presenter: PresenterKind::default(),
        }
    }
}

/// Where metric updates go: the caller's callback or a presenter.
enum MetricsSink {
    Callback,
    Presenter(Box<dyn ProgressPresenter>),
}

pub struct Supervisor {
    command: TranscodeCommand,
    options: SupervisorOptions,
    total_duration: Option<f64>,
    log_file: Option<PathBuf>,
    callback: Option<ProgressCallback>,
    presenter: Option<Box<dyn ProgressPresenter>>,
    terminator: Option<Box<dyn Terminate>>,
    on_success: Option<OutcomeHandler>,
    on_failure: Option<OutcomeHandler>,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(command: TranscodeCommand, options: SupervisorOptions) -> Self {
        Self {
            command,
            options,
            total_duration: None,
            log_file: None,
            callback: None,
            presenter: None,
            terminator: None,
            on_success: None,
            on_failure: None,
            state: SupervisorState::NotStarted,
        }
    }

    /// Total input duration in seconds, as reported by a probe.
    pub fn with_duration(mut self, total_duration: Option<f64>) -> Self {
        self.total_duration = total_duration;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Receive metrics directly instead of driving a presenter.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(Option<f64>, Option<f64>, Option<f64>, Option<u64>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Replace the presenter built from `SupervisorOptions::presenter`.
    pub fn with_presenter(mut self, presenter: Box<dyn ProgressPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn with_terminator(mut self, terminator: Box<dyn Terminate>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    pub fn on_success<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_success = Some(Box::new(handler));
        self
    }

    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_failure = Some(Box::new(handler));
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn command(&self) -> &TranscodeCommand {
        &self.command
    }

    /// Log file this run writes to.
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| LogSink::default_path(Path::new(DEFAULT_LOG_DIR), &self.command))
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!("Supervisor state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Launch the command and supervise it until it exits or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunOutcome, SupervisorError> {
        if cancel.is_cancelled() {
            info!("Cancellation requested before launch, not starting {}", self.command.program());
            self.transition(SupervisorState::TerminatedByRequest);
            match self.presenter.take() {
                Some(mut presenter) => presenter.complete(&Completion::Terminated),
                None => eprintln!("Process terminated."),
            }
            return Ok(RunOutcome::TerminatedByRequest(TerminationReport::not_launched()));
        }

        let log_path = self.log_path();
        let mut log = LogSink::create(&log_path).map_err(|source| SupervisorError::LogSink {
            path: log_path.clone(),
            source,
        })?;
        if let Err(e) = log.write_header(&self.command) {
            warn!("Unable to write to log file {}: {}", log_path.display(), e);
        }

        let mut child = launch::spawn(&self.command)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::MissingPipe("stderr"))?;
        self.transition(SupervisorState::Running);

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (diagnostic_tx, mut diagnostic_rx) = mpsc::unbounded_channel();
        let readers = [
            spawn_line_reader(stdout, StreamSource::Progress, progress_tx),
            spawn_line_reader(stderr, StreamSource::Diagnostic, diagnostic_tx),
        ];

        let mut ctx = self.run_context(log);

        loop {
            ctx.drain(&mut progress_rx, &mut diagnostic_rx, false);

            if cancel.is_cancelled() {
                info!("Cancellation requested, stopping {}", self.command.program());
                return self
                    .stop(child, ctx, readers, &mut progress_rx, &mut diagnostic_rx)
                    .await;
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Process exited with {}", status);
                    join_readers(readers, self.options.drain_timeout).await;
                    ctx.drain(&mut progress_rx, &mut diagnostic_rx, true);
                    return Ok(self.finish(status, ctx));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Unable to poll process status: {}", e);
                    let terminator = self.terminator();
                    terminator.terminate(&mut child).await?;
                    return Err(SupervisorError::Io(e));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    fn run_context(&mut self, log: LogSink) -> RunContext {
        let label = self.command.input_name();
        let mut aggregator = MetricsAggregator::new(self.total_duration);

        let display = match self.callback.take() {
            Some(mut callback) => {
                aggregator = aggregator.with_callback(Box::new(move |m: &ProgressMetrics| {
                    callback(m.percentage, m.speed, m.eta_seconds, m.estimated_final_size)
                }));
                MetricsSink::Callback
            }
            None => MetricsSink::Presenter(self.presenter.take().unwrap_or_else(|| {
                build_presenter(
                    self.options.presenter,
                    &label,
                    aggregator.total_duration(),
                    log.path(),
                )
            })),
        };

        RunContext {
            label,
            aggregator,
            display,
            diagnostics: DiagnosticCollector::new(),
            log,
            log_failed: false,
        }
    }

    fn terminator(&mut self) -> Box<dyn Terminate> {
        self.terminator.take().unwrap_or_else(|| {
            Box::new(PlatformTerminator::for_command(
                self.options.termination_timeout,
                &self.command,
            ))
        })
    }

    async fn stop(
        mut self,
        mut child: Child,
        mut ctx: RunContext,
        readers: [JoinHandle<()>; 2],
        progress_rx: &mut UnboundedReceiver<String>,
        diagnostic_rx: &mut UnboundedReceiver<String>,
    ) -> Result<RunOutcome, SupervisorError> {
        let terminator = self.terminator();
        let report = match terminator.terminate(&mut child).await {
            Ok(report) => report,
            Err(e) => {
                ctx.write_summary(SupervisorState::Running, None);
                return Err(e.into());
            }
        };

        join_readers(readers, self.options.drain_timeout).await;
        ctx.drain(progress_rx, diagnostic_rx, true);

        self.transition(SupervisorState::TerminatedByRequest);
        ctx.write_summary(SupervisorState::TerminatedByRequest, None);
        ctx.complete(&Completion::Terminated);
        Ok(RunOutcome::TerminatedByRequest(report))
    }

    fn finish(mut self, status: ExitStatus, mut ctx: RunContext) -> RunOutcome {
        let return_code = return_code(status);
        let state = if return_code == 0 {
            SupervisorState::Succeeded
        } else {
            SupervisorState::Failed
        };
        self.transition(state);
        ctx.write_summary(state, Some(return_code));

        if return_code == 0 {
            ctx.complete(&Completion::Succeeded);
            if let Some(handler) = self.on_success.take() {
                handler();
            }
            return RunOutcome::Succeeded(ctx.diagnostics.finish(return_code));
        }

        ctx.complete(&Completion::Failed { return_code });
        let log_path = ctx.log.path().to_path_buf();
        let exit = ctx.diagnostics.finish(return_code);
        match self.on_failure.take() {
            Some(handler) => handler(),
            None => report_failure(&exit, &log_path),
        }
        RunOutcome::Failed(exit)
    }
}

/// Per-run state owned by the poll loop.
struct RunContext {
    label: String,
    aggregator: MetricsAggregator,
    display: MetricsSink,
    diagnostics: DiagnosticCollector,
    log: LogSink,
    log_failed: bool,
}

impl RunContext {
    /// Pull lines from both queues. Outside the final pass only the lines
    /// already queued are taken, so a chatty child cannot starve the tick.
    fn drain(
        &mut self,
        progress_rx: &mut UnboundedReceiver<String>,
        diagnostic_rx: &mut UnboundedReceiver<String>,
        final_pass: bool,
    ) {
        let limit = |rx: &UnboundedReceiver<String>| {
            if final_pass {
                usize::MAX
            } else {
                rx.len()
            }
        };

        let available = limit(progress_rx);
        for _ in 0..available {
            match progress_rx.try_recv() {
                Ok(line) => self.on_progress_line(&line),
                Err(_) => break,
            }
        }

        let available = limit(diagnostic_rx);
        for _ in 0..available {
            match diagnostic_rx.try_recv() {
                Ok(line) => self.on_diagnostic_line(&line),
                Err(_) => break,
            }
        }
    }

    fn on_progress_line(&mut self, line: &str) {
        let Some(update) = parse_progress_line(line, self.aggregator.total_duration()) else {
            trace!("Ignoring progress line: {}", line);
            return;
        };
        let metrics = self.aggregator.update(update);
        if let MetricsSink::Presenter(presenter) = &mut self.display {
            presenter.render(metrics);
        }
    }

    fn on_diagnostic_line(&mut self, line: &str) {
        if self.diagnostics.record(line) {
            debug!("Failure line: {}", line);
        }
        if line.is_empty() || self.log_failed {
            return;
        }
        if let Err(e) = self.log.write_line(line) {
            warn!(
                "Unable to write to log file {}: {}",
                self.log.path().display(),
                e
            );
            self.log_failed = true;
        }
    }

    fn write_summary(&mut self, state: SupervisorState, return_code: Option<i32>) {
        let errors = self.diagnostics.error_count();
        if let Err(e) = self.log.write_summary(state, return_code, errors) {
            warn!("Unable to finalize log file {}: {}", self.log.path().display(), e);
        }
    }

    fn complete(&mut self, completion: &Completion) {
        match &mut self.display {
            MetricsSink::Presenter(presenter) => presenter.complete(completion),
            MetricsSink::Callback => match completion {
                Completion::Succeeded => eprintln!("✓ Processed {}", self.label),
                Completion::Failed { .. } => eprintln!(
                    "Process failed. Check {} for details.",
                    self.log.path().display()
                ),
                Completion::Terminated => eprintln!("Process terminated."),
            },
        }
    }
}

async fn join_readers(readers: [JoinHandle<()>; 2], timeout: Duration) {
    for mut reader in readers {
        match tokio::time::timeout(timeout, &mut reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Stream reader task failed: {}", e),
            Err(_) => {
                // A surviving descendant may still hold the pipe open.
                warn!("Stream reader did not finish within {:?}", timeout);
                reader.abort();
            }
        }
    }
}

fn report_failure(exit: &ExitOutcome, log_path: &Path) {
    eprintln!("Return code: {}", exit.return_code);
    for line in &exit.error_lines {
        eprintln!("  {}", line);
    }
    eprintln!("Full log: {}", log_path.display());
}

fn return_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
