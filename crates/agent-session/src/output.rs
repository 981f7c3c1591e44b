//! Output sinks fed with raw terminal output.

use agent_session_core::{Dimensions, WorkspaceKey};

/// Receives a session's raw output bytes.
///
/// A sink usually adapts an external terminal buffer. It is owned by its
/// session and disposed exactly once, when the session is retired.
pub trait OutputSink: Send {
    /// Consume a chunk of raw output.
    fn write(&mut self, bytes: &[u8]);

    /// Terminal size changed.
    fn resize(&mut self, _dimensions: Dimensions) {}

    /// Release resources. No further calls follow.
    fn dispose(&mut self) {}

    /// Buffered output, for sinks that keep any.
    fn snapshot(&self) -> Option<Vec<u8>> {
        None
    }

    /// Output buffered since the previous call, for sinks that keep any.
    fn read_since_last(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// Builds the sink for a new session.
pub type SinkFactory =
    std::sync::Arc<dyn Fn(&WorkspaceKey, Dimensions) -> Box<dyn OutputSink> + Send + Sync>;

/// Default scrollback kept by [`OutputBuffer`].
pub const DEFAULT_BUFFER_LIMIT: usize = 1024 * 1024;

/// Output buffer for tracking raw terminal output.
///
/// Keeps at most `limit` bytes, dropping the oldest.
#[derive(Debug)]
pub struct OutputBuffer {
    /// Raw bytes received from PTY (with ANSI codes)
    raw_buffer: Vec<u8>,
    /// Position of last read
    last_read_pos: usize,
    limit: usize,
    disposed: bool,
}

impl OutputBuffer {
    /// Create a new output buffer.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_BUFFER_LIMIT)
    }

    /// Create a buffer retaining at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            raw_buffer: Vec::new(),
            last_read_pos: 0,
            limit,
            disposed: false,
        }
    }

    /// Append new output to the buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        self.raw_buffer.extend_from_slice(bytes);
        if self.raw_buffer.len() > self.limit {
            let excess = self.raw_buffer.len() - self.limit;
            self.raw_buffer.drain(..excess);
            self.last_read_pos = self.last_read_pos.saturating_sub(excess);
        }
    }

    /// Whether [`OutputSink::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for OutputBuffer {
    fn write(&mut self, bytes: &[u8]) {
        self.append(bytes);
    }

    fn dispose(&mut self) {
        self.raw_buffer = Vec::new();
        self.last_read_pos = 0;
        self.disposed = true;
    }

    fn snapshot(&self) -> Option<Vec<u8>> {
        Some(self.raw_buffer.clone())
    }

    fn read_since_last(&mut self) -> Option<Vec<u8>> {
        let output = self.raw_buffer[self.last_read_pos..].to_vec();
        self.last_read_pos = self.raw_buffer.len();
        Some(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_buffer_new() {
        let buffer = OutputBuffer::new();
        assert_eq!(buffer.snapshot().unwrap(), b"");
        assert!(!buffer.is_disposed());
    }

    #[test]
    fn test_output_buffer_append() {
        let mut buffer = OutputBuffer::new();
        buffer.append(b"Hello");
        buffer.append(b" World");

        assert_eq!(buffer.snapshot().unwrap(), b"Hello World");
    }

    #[test]
    fn test_output_buffer_read_since_last() {
        let mut buffer = OutputBuffer::new();
        buffer.append(b"First");
        assert_eq!(buffer.read_since_last().unwrap(), b"First");
        assert_eq!(buffer.read_since_last().unwrap(), b"");

        buffer.append(b" Second");
        assert_eq!(buffer.read_since_last().unwrap(), b" Second");
        assert_eq!(buffer.snapshot().unwrap(), b"First Second");
    }

    #[test]
    fn test_output_buffer_limit_drops_oldest() {
        let mut buffer = OutputBuffer::with_limit(8);
        buffer.append(b"abcdef");
        assert_eq!(buffer.read_since_last().unwrap(), b"abcdef");

        buffer.append(b"ghij");
        assert_eq!(buffer.read_since_last().unwrap(), b"ghij");
        assert_eq!(buffer.snapshot().unwrap(), b"cdefghij");
    }

    #[test]
    fn test_output_buffer_as_sink() {
        let mut buffer = OutputBuffer::new();
        let sink: &mut dyn OutputSink = &mut buffer;
        sink.write(b"\x1b[32mok\x1b[0m");
        assert_eq!(sink.snapshot().unwrap(), b"\x1b[32mok\x1b[0m");

        sink.dispose();
        assert!(buffer.is_disposed());
        assert_eq!(buffer.snapshot().unwrap(), b"");
    }
}
