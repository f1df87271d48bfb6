//! Byte-level line framing and the I/O traits that make the reader task
//! and the session façade testable without opening a real socket.
//!
//! The wire format mixes CR and LF as terminators (possibly both, possibly
//! repeated), which rules out `tokio::io::AsyncBufReadExt::read_line` —
//! that only ever splits on `\n`. `LineFramer` implements the exact rule
//! from the framing contract: scan left to right, any `\r` or `\n` closes
//! the current accumulator, emit only if nonempty, carry residual bytes
//! to the next feed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Phd2Error, Result};

/// Bounded poll quantum for socket reads, so a terminate request is never
/// more than this far from being observed.
pub const POLL_QUANTUM: Duration = Duration::from_millis(500);

/// Pure, socket-independent byte-to-lines framer.
#[derive(Debug, Default)]
pub struct LineFramer {
    partial: Vec<u8>,
    lines: VecDeque<String>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of freshly read bytes. Completed lines become
    /// available via `pop_line`.
    pub fn feed(&mut self, bytes: &[u8]) {
        let mut start = 0;
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'\r' || b == b'\n' {
                self.partial.extend_from_slice(&bytes[start..i]);
                if !self.partial.is_empty() {
                    match String::from_utf8(std::mem::take(&mut self.partial)) {
                        Ok(line) => self.lines.push_back(line),
                        Err(_) => self.partial.clear(),
                    }
                }
                start = i + 1;
            }
        }
        self.partial.extend_from_slice(&bytes[start..]);
    }

    pub fn pop_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// A reader/writer pair for one connection.
pub struct ConnectionPair {
    pub reader: Box<dyn LineReader>,
    pub writer: Box<dyn MessageWriter>,
}

/// Reads complete lines off a connection.
///
/// `Ok(None)` signals orderly termination — either the peer closed the
/// connection or `Terminate` was requested — the Rust equivalent of the
/// framing contract's "empty line".
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait LineReader: Send {
    async fn read_line(&mut self) -> Result<Option<String>>;
}

/// Writes whole messages to a connection, terminator included.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait MessageWriter: Send {
    async fn write_message(&mut self, message: &str) -> Result<()>;
    async fn shutdown(&mut self) -> Result<()>;
}

/// Opens connections. Abstracted so tests can substitute an in-memory
/// transport without binding a real socket.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        addr: &str,
        timeout: Duration,
        terminate: Arc<AtomicBool>,
    ) -> Result<ConnectionPair>;
}

pub struct TcpLineReader {
    stream: ReadHalf<TcpStream>,
    framer: LineFramer,
    terminate: Arc<AtomicBool>,
    raw: [u8; 4096],
}

impl TcpLineReader {
    pub fn new(stream: ReadHalf<TcpStream>, terminate: Arc<AtomicBool>) -> Self {
        Self {
            stream,
            framer: LineFramer::new(),
            terminate,
            raw: [0u8; 4096],
        }
    }
}

#[async_trait]
impl LineReader for TcpLineReader {
    async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.framer.pop_line() {
                return Ok(Some(line));
            }
            if self.terminate.load(Ordering::Relaxed) {
                return Ok(None);
            }
            match tokio::time::timeout(POLL_QUANTUM, self.stream.read(&mut self.raw)).await {
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(n)) => self.framer.feed(&self.raw[..n]),
                Ok(Err(e)) => {
                    debug!("read error, treating as disconnect: {}", e);
                    return Ok(None);
                }
                Err(_elapsed) => continue,
            }
        }
    }
}

pub struct TcpMessageWriter {
    writer: WriteHalf<TcpStream>,
}

impl TcpMessageWriter {
    pub fn new(writer: WriteHalf<TcpStream>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl MessageWriter for TcpMessageWriter {
    async fn write_message(&mut self, message: &str) -> Result<()> {
        self.writer
            .write_all(format!("{}\r\n", message).as_bytes())
            .await
            .map_err(|e| Phd2Error::WriteError(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Phd2Error::WriteError(e.to_string()))
    }

    async fn shutdown(&mut self) -> Result<()> {
        let _ = self.writer.shutdown().await;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct TcpConnectionFactory;

impl TcpConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    async fn connect(
        &self,
        addr: &str,
        timeout: Duration,
        terminate: Arc<AtomicBool>,
    ) -> Result<ConnectionPair> {
        debug!("connecting to {}", addr);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Phd2Error::ConnectError(format!("timed out connecting to {}", addr)))?
            .map_err(|e| Phd2Error::ConnectError(format!("{}: {}", addr, e)))?;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(ConnectionPair {
            reader: Box::new(TcpLineReader::new(read_half, terminate)),
            writer: Box::new(TcpMessageWriter::new(write_half)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(framer_feed: impl Fn(&mut LineFramer)) -> Vec<String> {
        let mut framer = LineFramer::new();
        framer_feed(&mut framer);
        let mut out = Vec::new();
        while let Some(line) = framer.pop_line() {
            out.push(line);
        }
        out
    }

    #[test]
    fn splits_on_lf() {
        let lines = lines_of(|f| f.feed(b"one\ntwo\n"));
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn collapses_crlf_into_one_terminator() {
        let lines = lines_of(|f| f.feed(b"one\r\ntwo\r\n"));
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn collapses_consecutive_terminators() {
        let lines = lines_of(|f| f.feed(b"one\r\n\r\ntwo\n\n\nthree\n"));
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn carries_residual_bytes_across_feeds() {
        let mut framer = LineFramer::new();
        framer.feed(b"par");
        assert_eq!(framer.pop_line(), None);
        framer.feed(b"tial\n");
        assert_eq!(framer.pop_line(), Some("partial".to_string()));
    }

    #[test]
    fn idempotent_across_arbitrary_split_points() {
        let whole: &[u8] = b"{\"a\":1}\r\n{\"Event\":\"Paused\"}\n\nthird line\r";
        let mut whole_framer = LineFramer::new();
        whole_framer.feed(whole);
        let mut expected = Vec::new();
        while let Some(l) = whole_framer.pop_line() {
            expected.push(l);
        }

        for split_at in 0..=whole.len() {
            let (a, b) = whole.split_at(split_at);
            let mut framer = LineFramer::new();
            framer.feed(a);
            framer.feed(b);
            let mut got = Vec::new();
            while let Some(l) = framer.pop_line() {
                got.push(l);
            }
            assert_eq!(got, expected, "split at {} produced different lines", split_at);
        }
    }
}
