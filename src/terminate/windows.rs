use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{debug, info, warn};
use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};

use super::{
    is_running, terminate_tree, wait_for_exit, ParentSignaller, Terminate, TerminationError,
    TerminationReport, TerminationStage, DEFAULT_TERMINATION_TIMEOUT,
};
use crate::command::TranscodeCommand;

/// Programs that would sit between us and the transcoder's console group.
const SHELLS: &[&str] = &["cmd", "powershell", "pwsh", "bash", "sh"];

/// Terminates the child handle directly, optionally after a CTRL_BREAK to its
/// process group.
#[derive(Debug, Clone)]
pub struct WindowsTerminator {
    timeout: Duration,
    break_signal: bool,
}

impl Default for WindowsTerminator {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATION_TIMEOUT)
    }
}

impl WindowsTerminator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            break_signal: false,
        }
    }

    /// Children are launched in a new process group, so CTRL_BREAK reaches
    /// the transcoder unless a shell wrapper would swallow it.
    pub fn for_command(timeout: Duration, command: &TranscodeCommand) -> Self {
        let program = std::path::Path::new(command.program())
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            timeout,
            break_signal: !SHELLS.contains(&program.as_str()),
        }
    }

    async fn send_break(&self, child: &mut Child, pid: u32) -> bool {
        info!("Sending CTRL_BREAK to process group {}", pid);
        // SAFETY: plain FFI call; the group id is the pid of a child created
        // with CREATE_NEW_PROCESS_GROUP.
        let sent = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) } != 0;
        if !sent {
            debug!(
                "CTRL_BREAK could not be delivered: {}",
                std::io::Error::last_os_error()
            );
            return false;
        }
        wait_for_exit(child, self.timeout).await
    }
}

#[async_trait]
impl ParentSignaller for WindowsTerminator {
    async fn signal_parent(&self, child: &mut Child, pid: u32, report: &mut TerminationReport) {
        report.enter(TerminationStage::ParentSignaled);
        if self.break_signal && self.send_break(child, pid).await {
            return;
        }

        if self.break_signal {
            report.enter(TerminationStage::EscalatedKill);
        }
        // TerminateProcess: the only reliable stop for a console child.
        if let Err(e) = child.start_kill() {
            warn!("Unable to terminate process {}: {}", pid, e);
        }
        if !wait_for_exit(child, self.timeout).await && is_running(child) {
            warn!("Process {} still running after {:?}", pid, self.timeout);
        }
    }
}

#[async_trait]
impl Terminate for WindowsTerminator {
    async fn terminate(&self, child: &mut Child) -> Result<TerminationReport, TerminationError> {
        terminate_tree(child, self.timeout, self).await
    }
}
