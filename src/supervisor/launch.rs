//! Process creation: piped channels and a dedicated process group.

use std::io;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use super::SupervisorError;
use crate::command::TranscodeCommand;

/// Windows `CREATE_NEW_PROCESS_GROUP`, so CTRL_BREAK can target the child.
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 =
    windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;

pub(crate) fn spawn(command: &TranscodeCommand) -> Result<Child, SupervisorError> {
    let mut cmd = Command::new(command.program());
    cmd.args(command.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);

    debug!("Executing: {}", command);
    cmd.spawn().map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => SupervisorError::CommandNotFound(command.program().to_string()),
        _ => SupervisorError::Launch {
            program: command.program().to_string(),
            source,
        },
    })
}
