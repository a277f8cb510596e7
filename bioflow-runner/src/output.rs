//! Child process output multiplexing
//!
//! Drains a child's stdout and stderr from a single task, reading whichever
//! stream has data ready. A stream that is open but idle never blocks the
//! other one, and unterminated output left at end-of-stream is still
//! delivered as a final line.
//!
//! Lines are handed to an [`OutputSink`]. Order within a stream is
//! preserved; order across the two streams is whatever the timing gives.

use bioflow_core::domain::log::{LogLevel, OutputLine, OutputStream};
use std::collections::VecDeque;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

/// Receiver of child process output lines
pub trait OutputSink: Send {
    /// Write one line (without its terminator)
    fn write(&mut self, stream: OutputStream, line: &str);
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn write(&mut self, stream: OutputStream, line: &str) {
        (**self).write(stream, line);
    }
}

impl<A: OutputSink, B: OutputSink> OutputSink for (A, B) {
    fn write(&mut self, stream: OutputStream, line: &str) {
        self.0.write(stream, line);
        self.1.write(stream, line);
    }
}

/// Sink that logs lines through `tracing`
///
/// stdout lines are logged at info, stderr lines at error.
pub struct TracingSink {
    label: String,
}

impl TracingSink {
    /// # Arguments
    /// * `label` - Identifies the process in every log line (e.g. a container name)
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl OutputSink for TracingSink {
    fn write(&mut self, stream: OutputStream, line: &str) {
        match stream.level() {
            LogLevel::Debug => debug!(process = %self.label, %stream, "{}", line),
            LogLevel::Info => info!(process = %self.label, %stream, "{}", line),
            LogLevel::Warning => warn!(process = %self.label, %stream, "{}", line),
            LogLevel::Error => error!(process = %self.label, %stream, "{}", line),
        }
    }
}

/// Sink keeping only the last `capacity` lines of both streams
pub struct TailBuffer {
    capacity: usize,
    lines: VecDeque<String>,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    /// Consumes the buffer, returning the kept lines oldest first
    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

impl OutputSink for TailBuffer {
    fn write(&mut self, _stream: OutputStream, line: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }
}

/// Sink storing every line with its stream and arrival time
#[derive(Default)]
pub struct CollectingSink {
    lines: Vec<OutputLine>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> &[OutputLine] {
        &self.lines
    }

    /// Lines of one stream, in arrival order
    pub fn lines(&self, stream: OutputStream) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.stream == stream)
            .map(|l| l.line.as_str())
            .collect()
    }
}

impl OutputSink for CollectingSink {
    fn write(&mut self, stream: OutputStream, line: &str) {
        self.lines.push(OutputLine {
            timestamp: chrono::Utc::now(),
            stream,
            line: line.to_string(),
        });
    }
}

/// Number of lines delivered per stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

/// Byte-oriented line reader
///
/// Partial lines survive a cancelled read because they accumulate in the
/// reader's own buffer, which makes `next_line` safe to use in `select!`.
/// Invalid UTF-8 is replaced rather than treated as an error.
struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Returns the next line, or `None` once the stream is exhausted
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.inner.read_until(b'\n', &mut self.buf).await?;

        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut bytes = std::mem::take(&mut self.buf);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Drains both streams until each reaches end-of-stream
///
/// Returns once both streams are closed, in whichever order they close.
pub async fn drain<O, E, S>(stdout: O, stderr: E, sink: &mut S) -> io::Result<DrainStats>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    S: OutputSink + ?Sized,
{
    let mut stdout = LineReader::new(stdout);
    let mut stderr = LineReader::new(stderr);
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut stats = DrainStats::default();

    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line? {
                Some(line) => {
                    stats.stdout_lines += 1;
                    sink.write(OutputStream::Stdout, &line);
                }
                None => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line? {
                Some(line) => {
                    stats.stderr_lines += 1;
                    sink.write(OutputStream::Stderr, &line);
                }
                None => stderr_open = false,
            },
        }
    }

    Ok(stats)
}
