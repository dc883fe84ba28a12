//! Transcoder invocation: the validated argument list plus the flags that turn
//! on the machine-readable progress channel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Marker that precedes the primary input path or URL.
pub const INPUT_MARKER: &str = "-i";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command is empty")]
    Empty,

    #[error("Command has no '{INPUT_MARKER}' input argument")]
    MissingInput,

    #[error("Command has more than one '{INPUT_MARKER}' input argument")]
    MultipleInputs,

    #[error("'{INPUT_MARKER}' must be followed by an input path or URL")]
    InputWithoutValue,

    #[error("The last argument must be the output path, found '{0}'")]
    MissingOutput(String),
}

/// Value passed to the transcoder's `-loglevel` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Quiet,
    Panic,
    Fatal,
    Error,
    Warning,
    Info,
    #[default]
    Verbose,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Panic => "panic",
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol flags that route `key=value` progress lines to stdout.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressFlags {
    pub loglevel: LogLevel,
    pub stats_period: Duration,
}

impl Default for ProgressFlags {
    fn default() -> Self {
        Self {
            loglevel: LogLevel::default(),
            stats_period: Duration::from_millis(100),
        }
    }
}

impl ProgressFlags {
    fn to_args(&self) -> Vec<String> {
        vec![
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
            "-stats_period".to_string(),
            format!("{}", self.stats_period.as_secs_f64()),
            "-loglevel".to_string(),
            self.loglevel.as_str().to_string(),
        ]
    }
}

/// A validated transcoder invocation.
///
/// The first element is the program, exactly one `-i` is followed by the
/// primary input, and the last element is the output path.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeCommand {
    argv: Vec<String>,
    input_index: usize,
    progress: Option<ProgressFlags>,
}

impl TranscodeCommand {
    pub fn parse<I, S>(argv: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        if argv.is_empty() {
            return Err(CommandError::Empty);
        }

        let mut markers = argv
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, arg)| arg.as_str() == INPUT_MARKER)
            .map(|(idx, _)| idx);

        let marker = markers.next().ok_or(CommandError::MissingInput)?;
        if markers.next().is_some() {
            return Err(CommandError::MultipleInputs);
        }

        let input_index = marker + 1;
        if input_index >= argv.len() {
            return Err(CommandError::InputWithoutValue);
        }

        // The input value itself cannot double as the output path.
        let last = argv.len() - 1;
        if last <= input_index {
            return Err(CommandError::MissingOutput(argv[last].clone()));
        }

        Ok(Self {
            argv,
            input_index,
            progress: None,
        })
    }

    /// Attach the progress protocol flags, inserted right after the program.
    pub fn with_progress(mut self, flags: ProgressFlags) -> Self {
        self.progress = Some(flags);
        self
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn input(&self) -> &str {
        &self.argv[self.input_index]
    }

    pub fn output(&self) -> &str {
        &self.argv[self.argv.len() - 1]
    }

    /// Short display name for the input, used in progress labels and the
    /// default log file name.
    pub fn input_name(&self) -> String {
        let input = self.input().trim_end_matches('/');
        let tail = input.rsplit(['/', '\\']).next().unwrap_or(input);
        let tail = tail.split(['?', '#']).next().unwrap_or(tail);
        if tail.is_empty() {
            input.to_string()
        } else {
            Path::new(tail)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| tail.to_string())
        }
    }

    /// Arguments handed to the program, progress flags included.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.argv.len() + 7);
        if let Some(flags) = &self.progress {
            args.extend(flags.to_args());
        }
        args.extend(self.argv[1..].iter().cloned());
        args
    }

    pub fn has_progress_flags(&self) -> bool {
        self.progress.is_some()
    }

    /// Shell-quoted rendering for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program().to_string()];
        parts.extend(self.args());
        shell_words::join(parts)
    }
}

impl fmt::Display for TranscodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        shell_words::split(s).unwrap()
    }

    #[test]
    fn test_parse_valid_command() {
        let cmd = TranscodeCommand::parse(argv("ffmpeg -i in.webm -c:v libx264 out.mp4")).unwrap();
        assert_eq!(cmd.program(), "ffmpeg");
        assert_eq!(cmd.input(), "in.webm");
        assert_eq!(cmd.output(), "out.mp4");
        assert!(!cmd.has_progress_flags());
        assert_eq!(cmd.args(), argv("-i in.webm -c:v libx264 out.mp4"));
    }

    #[test]
    fn test_parse_rejects_missing_input() {
        assert_eq!(
            TranscodeCommand::parse(argv("ffmpeg -c:v libx264 out.mp4")),
            Err(CommandError::MissingInput)
        );
        assert_eq!(
            TranscodeCommand::parse(Vec::<String>::new()),
            Err(CommandError::Empty)
        );
    }

    #[test]
    fn test_parse_rejects_multiple_inputs() {
        assert_eq!(
            TranscodeCommand::parse(argv("ffmpeg -i a.mp4 -i b.mp4 out.mp4")),
            Err(CommandError::MultipleInputs)
        );
    }

    #[test]
    fn test_parse_rejects_missing_output() {
        assert_eq!(
            TranscodeCommand::parse(argv("ffmpeg -i in.mp4")),
            Err(CommandError::MissingOutput("in.mp4".to_string()))
        );
        assert_eq!(
            TranscodeCommand::parse(argv("ffmpeg -i")),
            Err(CommandError::InputWithoutValue)
        );
    }

    #[test]
    fn test_progress_flags_follow_program() {
        let cmd = TranscodeCommand::parse(argv("ffmpeg -i in.mkv out.mp4"))
            .unwrap()
            .with_progress(ProgressFlags {
                loglevel: LogLevel::Warning,
                stats_period: Duration::from_millis(500),
            });

        let args = cmd.args();
        assert_eq!(
            &args[..7],
            &argv("-progress pipe:1 -nostats -stats_period 0.5 -loglevel warning")[..]
        );
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert_eq!(cmd.output(), "out.mp4");
    }

    #[test]
    fn test_input_name_for_paths_and_urls() {
        let local = TranscodeCommand::parse(argv("ffmpeg -i /videos/clip.webm out.mp4")).unwrap();
        assert_eq!(local.input_name(), "clip.webm");

        let remote = TranscodeCommand::parse(argv(
            "ffmpeg -i https://example.com/sample/Bunny.mp4?token=abc -f null -",
        ))
        .unwrap();
        assert_eq!(remote.input_name(), "Bunny.mp4");
        assert_eq!(remote.output(), "-");
    }

    #[test]
    fn test_display_quotes_arguments() {
        let cmd = TranscodeCommand::parse(vec!["ffmpeg", "-i", "my clip.mp4", "out.mp4"]).unwrap();
        assert_eq!(cmd.display(), "ffmpeg -i 'my clip.mp4' out.mp4");
    }
}
