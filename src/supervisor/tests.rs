use super::*;
use crate::progress::ProgressMetrics;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Snapshot = (Option<f64>, Option<f64>, Option<f64>, Option<u64>);

/// `sh -c <script> -i input.mp4 out.mp4`: a valid command whose "transcoder"
/// is a shell script speaking the progress protocol.
fn scripted(script: &str) -> TranscodeCommand {
    TranscodeCommand::parse(["sh", "-c", script, "-i", "input.mp4", "out.mp4"]).unwrap()
}

fn fast_options() -> SupervisorOptions {
    SupervisorOptions {
        poll_interval: Duration::from_millis(10),
        termination_timeout: Duration::from_secs(1),
        drain_timeout: Duration::from_secs(1),
        presenter: PresenterKind::Simple,
    }
}

fn recording(supervisor: Supervisor) -> (Supervisor, Arc<Mutex<Vec<Snapshot>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let supervisor = supervisor.on_progress(move |pct, speed, eta, size| {
        sink.lock().unwrap().push((pct, speed, eta, size));
    });
    (supervisor, seen)
}

#[derive(Clone, Default)]
struct RecordingPresenter {
    renders: Arc<Mutex<Vec<ProgressMetrics>>>,
    completions: Arc<Mutex<Vec<Completion>>>,
}

impl ProgressPresenter for RecordingPresenter {
    fn render(&mut self, metrics: &ProgressMetrics) {
        self.renders.lock().unwrap().push(metrics.clone());
    }

    fn complete(&mut self, completion: &Completion) {
        self.completions.lock().unwrap().push(completion.clone());
    }
}

struct StubbornTerminator;

#[async_trait]
impl Terminate for StubbornTerminator {
    async fn terminate(&self, child: &mut Child) -> Result<TerminationReport, TerminationError> {
        Err(TerminationError::StillAlive {
            pid: child.id().unwrap_or(0),
            survivors: Vec::new(),
        })
    }
}

#[tokio::test]
async fn test_successful_run_reports_progress() {
    let dir = TempDir::new().unwrap();
    let script = "printf 'out_time_ms=5000000\\nspeed=1x\\ntotal_size=1000\\nprogress=continue\\n'; \
                  echo 'Output #0, mp4, to out.mp4:' >&2; \
                  printf 'out_time_ms=10000000\\nspeed=2x\\ntotal_size=2000\\nprogress=end\\n'";
    let succeeded = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));
    let (s, f) = (Arc::clone(&succeeded), Arc::clone(&failed));

    let (supervisor, seen) = recording(
        Supervisor::new(scripted(script), fast_options())
            .with_duration(Some(10.0))
            .with_log_file(dir.path().join("run.txt"))
            .on_success(move || s.store(true, Ordering::SeqCst))
            .on_failure(move || f.store(true, Ordering::SeqCst)),
    );
    assert_eq!(supervisor.state(), SupervisorState::NotStarted);

    let outcome = supervisor.run(CancellationToken::new()).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.state().is_terminal());
    let exit = outcome.exit().unwrap();
    assert_eq!(exit.diagnostic_lines, vec!["Output #0, mp4, to out.mp4:"]);
    assert!(exit.error_lines.is_empty());
    assert!(succeeded.load(Ordering::SeqCst));
    assert!(!failed.load(Ordering::SeqCst));

    let seen = seen.lock().unwrap();
    let (pct, speed, eta, size) = *seen.last().unwrap();
    assert_eq!(pct, Some(100.0));
    assert_eq!(speed, Some(2.0));
    assert_eq!(eta, Some(0.0));
    assert_eq!(size, Some(2000));

    // Percentage never decreases across updates.
    let percentages: Vec<f64> = seen.iter().filter_map(|s| s.0).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_failed_run_collects_error_lines() {
    let dir = TempDir::new().unwrap();
    let log_file = dir.path().join("logs").join("[abc.webm].txt");
    let script = "echo 'Input #0, matroska' >&2; \
                  echo 'abc.webm: No such file or directory' >&2; exit 1";
    let failed = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&failed);
    let presenter = RecordingPresenter::default();
    let completions = Arc::clone(&presenter.completions);

    let outcome = Supervisor::new(scripted(script), fast_options())
        .with_log_file(&log_file)
        .with_presenter(Box::new(presenter))
        .on_failure(move || f.store(true, Ordering::SeqCst))
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.state(), SupervisorState::Failed);
    assert_eq!(outcome.exit_code(), 1);
    let exit = outcome.exit().unwrap();
    assert_eq!(exit.return_code, 1);
    assert_eq!(exit.error_lines, vec!["abc.webm: No such file or directory"]);
    assert!(failed.load(Ordering::SeqCst));
    assert_eq!(
        *completions.lock().unwrap(),
        vec![Completion::Failed { return_code: 1 }]
    );

    let log = std::fs::read_to_string(&log_file).unwrap();
    assert!(log.contains("abc.webm: No such file or directory"));
    assert!(log.contains("state=failed return_code=1 error_lines=1"));
}

#[tokio::test]
async fn test_unknown_duration_leaves_percentage_unknown() {
    let dir = TempDir::new().unwrap();
    let script = "printf 'out_time_ms=2000000\\nspeed=N/A\\nspeed=4x\\nbitrate=N/A\\nprogress=end\\n'";
    let presenter = RecordingPresenter::default();
    let renders = Arc::clone(&presenter.renders);

    let outcome = Supervisor::new(scripted(script), fast_options())
        .with_duration(None)
        .with_log_file(dir.path().join("run.txt"))
        .with_presenter(Box::new(presenter))
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    let renders = renders.lock().unwrap();
    assert_eq!(renders.len(), 3, "elapsed, speed and end updates");
    assert!(renders.iter().all(|m| m.percentage.is_none()));
    assert_eq!(renders.last().unwrap().seconds_processed, 2.0);
    assert_eq!(renders.last().unwrap().speed, Some(4.0));
}

#[tokio::test]
async fn test_heavy_output_on_both_channels_does_not_stall() {
    let dir = TempDir::new().unwrap();
    let script = "i=0; while [ $i -lt 3000 ]; do \
                  echo \"frame=$i fps=25 q=28.0 size=N/A\" >&2; \
                  echo \"out_time_ms=$((i * 1000))\"; i=$((i + 1)); done";

    let (supervisor, seen) = recording(
        Supervisor::new(scripted(script), fast_options())
            .with_duration(Some(3.0))
            .with_log_file(dir.path().join("run.txt")),
    );
    let outcome = tokio::time::timeout(
        Duration::from_secs(30),
        supervisor.run(CancellationToken::new()),
    )
    .await
    .expect("supervisor stalled")
    .unwrap();

    let exit = outcome.exit().unwrap();
    assert_eq!(exit.return_code, 0);
    assert_eq!(exit.diagnostic_lines.len(), 3000);
    assert_eq!(exit.diagnostic_lines[2999], "frame=2999 fps=25 q=28.0 size=N/A");
    assert_eq!(seen.lock().unwrap().len(), 3000);
}

#[tokio::test]
async fn test_cancellation_terminates_process_tree() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let presenter = RecordingPresenter::default();
    let completions = Arc::clone(&presenter.completions);
    let succeeded = Arc::new(AtomicBool::new(false));
    let s = Arc::clone(&succeeded);

    let supervisor = Supervisor::new(scripted("sleep 30 & sleep 30 & wait"), fast_options())
        .with_log_file(dir.path().join("run.txt"))
        .with_presenter(Box::new(presenter))
        .on_success(move || s.store(true, Ordering::SeqCst));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let outcome = supervisor.run(cancel).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.exit_code(), CANCELLED_EXIT_CODE);
    match outcome {
        RunOutcome::TerminatedByRequest(report) => {
            assert_eq!(report.descendants.len(), 2);
            assert!(crate::terminate::descendants::still_alive(&report.descendants).is_empty());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(*completions.lock().unwrap(), vec![Completion::Terminated]);
    assert!(!succeeded.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_termination_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = Supervisor::new(scripted("exec sleep 30"), fast_options())
        .with_log_file(dir.path().join("run.txt"))
        .with_presenter(Box::new(RecordingPresenter::default()))
        .with_terminator(Box::new(StubbornTerminator))
        .run(cancel)
        .await;

    assert!(matches!(
        result,
        Err(SupervisorError::Termination(TerminationError::StillAlive { .. }))
    ));
}

#[tokio::test]
async fn test_cancel_before_launch_does_not_start_process() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("started");
    let log_file = dir.path().join("run.txt");
    let script = format!("touch '{}'; exec sleep 30", marker.display());
    let presenter = RecordingPresenter::default();
    let completions = Arc::clone(&presenter.completions);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = Supervisor::new(scripted(&script), fast_options())
        .with_log_file(&log_file)
        .with_presenter(Box::new(presenter))
        .run(cancel)
        .await
        .unwrap();

    assert_eq!(outcome.exit_code(), CANCELLED_EXIT_CODE);
    match outcome {
        RunOutcome::TerminatedByRequest(report) => {
            assert_eq!(report.pid, None);
            assert!(!report.already_exited);
            assert!(report.descendants.is_empty());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!marker.exists(), "process was started after cancellation");
    assert!(!log_file.exists());
    assert_eq!(*completions.lock().unwrap(), vec![Completion::Terminated]);
}

#[tokio::test]
async fn test_missing_program_is_a_launch_failure() {
    let dir = TempDir::new().unwrap();
    let command = TranscodeCommand::parse([
        "ffprogress-missing-transcoder",
        "-i",
        "input.mp4",
        "out.mp4",
    ])
    .unwrap();

    let result = Supervisor::new(command, fast_options())
        .with_log_file(dir.path().join("run.txt"))
        .with_presenter(Box::new(RecordingPresenter::default()))
        .run(CancellationToken::new())
        .await;

    match result {
        Err(SupervisorError::CommandNotFound(program)) => {
            assert_eq!(program, "ffprogress-missing-transcoder")
        }
        other => panic!("expected CommandNotFound, got {:?}", other.map(|o| o.state())),
    }
}

#[test]
fn test_exit_code_mapping() {
    let exit = |code| ExitOutcome {
        return_code: code,
        diagnostic_lines: Vec::new(),
        error_lines: Vec::new(),
    };
    assert_eq!(RunOutcome::Succeeded(exit(0)).exit_code(), 0);
    assert_eq!(RunOutcome::Failed(exit(187)).exit_code(), 187);
    assert_eq!(RunOutcome::Failed(exit(0)).exit_code(), 1);
    assert_eq!(SupervisorState::TerminatedByRequest.to_string(), "terminated_by_request");
    assert!(!SupervisorState::Running.is_terminal());
}

#[test]
fn test_default_log_path_follows_input_name() {
    let supervisor = Supervisor::new(scripted("exit 0"), SupervisorOptions::default());
    assert_eq!(
        supervisor.log_path(),
        Path::new("ffmpeg_output").join("[input.mp4].txt")
    );
}
