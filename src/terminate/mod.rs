//! Graceful-then-forced shutdown of a supervised process tree.
//!
//! The flow is the same on every platform: snapshot the descendants, ask them
//! to exit and kill the stragglers, then stop the parent with the platform's
//! own escalation, and finally confirm nothing is left running. Only that
//! last check can fail; everything before it logs and carries on.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{info, warn};

pub mod descendants;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::UnixTerminator;
#[cfg(windows)]
pub use windows::WindowsTerminator;

#[cfg(unix)]
pub type PlatformTerminator = UnixTerminator;
#[cfg(windows)]
pub type PlatformTerminator = WindowsTerminator;


/// Default wait at each escalation step.
pub const DEFAULT_TERMINATION_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TerminationError {
    #[error("Process {pid} failed to terminate ({} descendant(s) still running)", .survivors.len())]
    StillAlive { pid: u32, survivors: Vec<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStage {
    Requested,
    ChildrenSignaled,
    ParentSignaled,
    EscalatedKill,
    ConfirmedDead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationReport {
    /// `None` when the process had already been reaped, or was never launched.
    pub pid: Option<u32>,
    pub stages: Vec<TerminationStage>,
    pub descendants: Vec<u32>,
    pub descendants_force_killed: Vec<u32>,
    /// The process had already exited when termination was requested.
    pub already_exited: bool,
}

impl TerminationReport {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            stages: vec![TerminationStage::Requested],
            descendants: Vec::new(),
            descendants_force_killed: Vec::new(),
            already_exited: false,
        }
    }

    fn exited(pid: Option<u32>) -> Self {
        let mut report = Self::new(pid);
        report.already_exited = true;
        report.stages.push(TerminationStage::ConfirmedDead);
        report
    }

    /// Cancellation arrived before any process was created.
    pub fn not_launched() -> Self {
        Self::new(None)
    }

    pub(crate) fn enter(&mut self, stage: TerminationStage) {
        if !self.stages.contains(&stage) {
            self.stages.push(stage);
        }
    }

    pub fn escalated(&self) -> bool {
        self.stages.contains(&TerminationStage::EscalatedKill)
    }
}

/// Stops a live child and everything it spawned.
#[async_trait]
pub trait Terminate: Send + Sync {
    async fn terminate(&self, child: &mut Child) -> Result<TerminationReport, TerminationError>;
}

/// Platform step that stops the parent once its descendants have been handled.
#[async_trait]
pub(crate) trait ParentSignaller: Send + Sync {
    async fn signal_parent(&self, child: &mut Child, pid: u32, report: &mut TerminationReport);
}

pub(crate) async fn terminate_tree(
    child: &mut Child,
    timeout: Duration,
    signaller: &dyn ParentSignaller,
) -> Result<TerminationReport, TerminationError> {
    let pid = match child.id() {
        Some(pid) if is_running(child) => pid,
        pid => {
            info!("Process already exited before termination started");
            return Ok(TerminationReport::exited(pid));
        }
    };

    info!("Terminating process {}", pid);
    let mut report = TerminationReport::new(Some(pid));

    // Snapshot first: once the parent dies its children are reparented and
    // can no longer be found through it.
    let children = descendants::find_descendants(pid);
    let outcome = descendants::terminate_descendants(&children, timeout).await;
    report.descendants = outcome.found;
    report.descendants_force_killed = outcome.force_killed;
    report.enter(TerminationStage::ChildrenSignaled);

    if is_running(child) {
        signaller.signal_parent(child, pid, &mut report).await;
    } else {
        info!(
            "Process {} exited while its children were being terminated",
            pid
        );
    }

    let survivors = descendants::still_alive(&report.descendants);
    if is_running(child) || !survivors.is_empty() {
        return Err(TerminationError::StillAlive { pid, survivors });
    }

    report.enter(TerminationStage::ConfirmedDead);
    info!("Process {} terminated", pid);
    Ok(report)
}

pub(crate) fn is_running(child: &mut Child) -> bool {
    match child.try_wait() {
        Ok(None) => true,
        Ok(Some(_)) => false,
        Err(e) => {
            warn!("Unable to check process status: {}", e);
            false
        }
    }
}

/// Wait up to `timeout` for the child to exit, reaping it if it does.
pub(crate) async fn wait_for_exit(child: &mut Child, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            warn!("Error while waiting for process exit: {}", e);
            !is_running(child)
        }
        Err(_) => false,
    }
}
