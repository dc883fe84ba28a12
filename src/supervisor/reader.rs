//! One reader task per child pipe, each feeding its own queue.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Which of the child's pipes a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    /// stdout: `key=value` progress telemetry.
    Progress,
    /// stderr: free-form log output.
    Diagnostic,
}

/// Read `stream` to EOF, pushing each stripped line into `queue`.
///
/// Bytes that are not valid UTF-8 are replaced rather than treated as errors.
/// The stream is dropped, and so closed, when the task ends.
pub fn spawn_line_reader<R>(
    stream: R,
    source: StreamSource,
    queue: UnboundedSender<String>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::with_capacity(256);
        let mut count = 0usize;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim().to_string();
                    count += 1;
                    if queue.send(line).is_err() {
                        trace!("{:?} queue closed, stopping reader", source);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read {:?} stream: {}", source, e);
                    break;
                }
            }
        }

        trace!("{:?} stream closed after {} line(s)", source, count);
    })
}
