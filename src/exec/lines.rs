// src/exec/lines.rs

//! Line assembly over raw process output.
//!
//! Pipes deliver arbitrary chunks; a line (and therefore a readiness marker)
//! can straddle two reads. [`LineScanner`] buffers partial lines up to a
//! fixed bound and [`LineReader`] drives it over any `AsyncRead`.

use std::collections::VecDeque;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::types::ProcessRole;

/// Longest line kept intact. Anything longer is emitted in pieces of this
/// size so a process that never prints a newline cannot grow the buffer
/// without bound.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Incremental, bounded line splitter.
#[derive(Debug)]
pub struct LineScanner {
    buf: Vec<u8>,
    max_line: usize,
}

impl LineScanner {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    /// Feed a chunk; returns every line it completed. Trailing `\r` is
    /// stripped, invalid UTF-8 is replaced.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.extend_bounded(&rest[..pos], &mut lines);
            lines.push(self.take_line());
            rest = &rest[pos + 1..];
        }
        self.extend_bounded(rest, &mut lines);

        lines
    }

    /// Flush whatever partial line is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn extend_bounded(&mut self, bytes: &[u8], lines: &mut Vec<String>) {
        self.buf.extend_from_slice(bytes);
        // A full buffer stays put until the next byte shows whether the line
        // ends there.
        while self.buf.len() > self.max_line {
            let tail = self.buf.split_off(self.max_line);
            let head = std::mem::replace(&mut self.buf, tail);
            lines.push(String::from_utf8_lossy(&head).into_owned());
        }
    }

    fn take_line(&mut self) -> String {
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8_lossy(&line).into_owned()
    }
}

impl Default for LineScanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

/// Lazy line sequence over a reader. Ends (`Ok(None)`) when the reader hits
/// EOF; not restartable.
pub struct LineReader<R> {
    reader: R,
    scanner: LineScanner,
    pending: VecDeque<String>,
    chunk: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_line(reader, DEFAULT_MAX_LINE)
    }

    pub fn with_max_line(reader: R, max_line: usize) -> Self {
        Self {
            reader,
            scanner: LineScanner::new(max_line),
            pending: VecDeque::new(),
            chunk: vec![0; READ_CHUNK],
            eof: false,
        }
    }

    /// Next complete line. Cancel-safe: dropping the future between reads
    /// loses no buffered data.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.eof = true;
                if let Some(line) = self.scanner.finish() {
                    self.pending.push_back(line);
                }
                continue;
            }
            let lines = self.scanner.push(&self.chunk[..n]);
            self.pending.extend(lines);
        }
    }
}

/// Consume a stream to EOF, logging each line at debug. Keeps the child from
/// blocking on a full pipe when nobody else is reading its output.
pub async fn drain_lines<R: AsyncRead + Unpin>(
    lines: &mut LineReader<R>,
    role: ProcessRole,
    stream: &'static str,
) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(role = %role, "{}: {}", stream, line),
            Ok(None) => break,
            Err(e) => {
                debug!(role = %role, error = %e, "{} read error; stop draining", stream);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_across_chunks() {
        let mut scanner = LineScanner::default();
        assert!(scanner.push(b"Connected! You may").is_empty());
        let lines = scanner.push(b" start your tests.\r\nnext");
        assert_eq!(lines, vec!["Connected! You may start your tests."]);
        assert_eq!(scanner.finish().as_deref(), Some("next"));
        assert_eq!(scanner.finish(), None);
    }

    #[test]
    fn overlong_lines_are_split_at_the_bound() {
        let mut scanner = LineScanner::new(4);
        let lines = scanner.push(b"abcdefghij\n");
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn line_exactly_at_the_bound_is_emitted_once() {
        let mut scanner = LineScanner::new(4);
        assert_eq!(scanner.push(b"abcd\nxy\n"), vec!["abcd", "xy"]);

        let mut scanner = LineScanner::new(4);
        assert!(scanner.push(b"abcd").is_empty());
        assert_eq!(scanner.push(b"\nef"), vec!["abcd"]);
        assert_eq!(scanner.finish().as_deref(), Some("ef"));
    }

    #[test]
    fn empty_lines_are_kept() {
        let mut scanner = LineScanner::default();
        assert_eq!(scanner.push(b"a\n\nb\n"), vec!["a", "", "b"]);
    }

    #[tokio::test]
    async fn reader_yields_lines_then_none() {
        let data: &[u8] = b"one\ntwo\nthree";
        let mut reader = LineReader::new(data);
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("two"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("three"));
        assert_eq!(reader.next_line().await.unwrap(), None);
        assert_eq!(reader.next_line().await.unwrap(), None);
    }
}
