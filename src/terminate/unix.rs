use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, getpgrp, Pid};
use tokio::process::Child;
use tracing::{debug, info, warn};

use super::{
    is_running, terminate_tree, wait_for_exit, ParentSignaller, Terminate, TerminationError,
    TerminationReport, TerminationStage, DEFAULT_TERMINATION_TIMEOUT,
};
use crate::command::TranscodeCommand;

/// Signals the child's process group, falling back to the child itself.
#[derive(Debug, Clone)]
pub struct UnixTerminator {
    timeout: Duration,
}

impl Default for UnixTerminator {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATION_TIMEOUT)
    }
}

impl UnixTerminator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Every launch gets its own process group on Unix, so the command does
    /// not change the strategy.
    pub fn for_command(timeout: Duration, _command: &TranscodeCommand) -> Self {
        Self::new(timeout)
    }

    /// SIGTERM the group, then SIGKILL it. Returns false when the group
    /// route is unusable and the caller should signal the process directly.
    async fn signal_group(
        &self,
        child: &mut Child,
        pgid: Pid,
        report: &mut TerminationReport,
    ) -> bool {
        info!("Sending SIGTERM to process group {}", pgid);
        match killpg(pgid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                debug!("Process group {} no longer exists", pgid);
                return !is_running(child);
            }
            Err(e) => {
                warn!(
                    "Error sending SIGTERM to process group {}: {}. Falling back to the process",
                    pgid, e
                );
                return false;
            }
        }
        report.enter(TerminationStage::ParentSignaled);

        if wait_for_exit(child, self.timeout).await {
            return true;
        }

        warn!(
            "Process group {} did not exit after SIGTERM, sending SIGKILL",
            pgid
        );
        report.enter(TerminationStage::EscalatedKill);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            if e != Errno::ESRCH {
                warn!("Error sending SIGKILL to process group {}: {}", pgid, e);
            }
        }

        if wait_for_exit(child, self.timeout).await {
            return true;
        }
        warn!("Process group {} still running after SIGKILL", pgid);
        false
    }

    async fn signal_process(&self, child: &mut Child, pid: Pid, report: &mut TerminationReport) {
        if !is_running(child) {
            return;
        }

        info!("Sending SIGTERM to process {}", pid);
        report.enter(TerminationStage::ParentSignaled);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) => {
                if wait_for_exit(child, self.timeout).await {
                    return;
                }
                warn!(
                    "SIGTERM for process {} timed out after {:?}",
                    pid, self.timeout
                );
            }
            Err(Errno::ESRCH) => {
                debug!("Process {} already gone", pid);
            }
            Err(e) => warn!("Error sending SIGTERM to process {}: {}", pid, e),
        }

        if !is_running(child) {
            return;
        }

        warn!("Process {} still running, sending SIGKILL", pid);
        report.enter(TerminationStage::EscalatedKill);
        if let Err(e) = child.start_kill() {
            warn!("Error sending SIGKILL to process {}: {}", pid, e);
        }
        wait_for_exit(child, self.timeout).await;
    }
}

#[async_trait]
impl ParentSignaller for UnixTerminator {
    async fn signal_parent(&self, child: &mut Child, pid: u32, report: &mut TerminationReport) {
        let pid = Pid::from_raw(pid as i32);

        match getpgid(Some(pid)) {
            // Signaling our own group would take the supervisor down with it.
            Ok(pgid) if pgid == getpgrp() => {
                debug!(
                    "Process {} shares the supervisor's process group, signaling it directly",
                    pid
                );
            }
            Ok(pgid) => {
                if self.signal_group(child, pgid, report).await {
                    return;
                }
            }
            Err(e) => {
                warn!(
                    "Could not look up the process group of {}: {}. Falling back to the process",
                    pid, e
                );
            }
        }

        self.signal_process(child, pid, report).await;
    }
}

#[async_trait]
impl Terminate for UnixTerminator {
    async fn terminate(&self, child: &mut Child) -> Result<TerminationReport, TerminationError> {
        terminate_tree(child, self.timeout, self).await
    }
}
