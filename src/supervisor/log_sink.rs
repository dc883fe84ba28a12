//! Plain-text file receiving the transcoder's diagnostic output.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use super::SupervisorState;
use crate::command::TranscodeCommand;

/// Directory used when no log file is configured.
pub const DEFAULT_LOG_DIR: &str = "ffmpeg_output";

pub struct LogSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogSink {
    /// Create (or truncate) the log file, creating parent directories as needed.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// `<log_dir>/[<input name>].txt`
    pub fn default_path(log_dir: &Path, command: &TranscodeCommand) -> PathBuf {
        log_dir.join(format!("[{}].txt", command.input_name()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_header(&mut self, command: &TranscodeCommand) -> io::Result<()> {
        writeln!(
            self.writer,
            "# {} started: {}",
            Local::now().to_rfc3339(),
            command
        )
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", line)
    }

    /// Append the outcome summary and flush.
    pub fn write_summary(
        &mut self,
        state: SupervisorState,
        return_code: Option<i32>,
        error_lines: usize,
    ) -> io::Result<()> {
        let code = return_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            self.writer,
            "# {} finished: state={} return_code={} error_lines={}",
            Local::now().to_rfc3339(),
            state,
            code,
            error_lines
        )?;
        self.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
