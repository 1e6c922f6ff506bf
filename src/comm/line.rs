// Newline-terminated ASCII power values over a byte stream
//
// Wire format: ASCII decimal, terminated by '\n', at most COMM_LINE_MAX - 1
// characters. No other framing.

use std::io::{ErrorKind, Read};

use tracing::debug;

use super::CommError;
use crate::config::COMM_LINE_MAX;

/// Bounded receive buffer for power lines.
///
/// Bytes that arrive after a newline are kept for the next call. A line that
/// fills the buffer without a newline is reported as `Retry` once; the rest
/// of it is dropped silently, so the next call starts on a fresh line.
#[derive(Debug)]
pub struct LineBuffer {
    buf: [u8; COMM_LINE_MAX],
    len: usize,
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0; COMM_LINE_MAX],
            len: 0,
            discarding: false,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.discarding = false;
    }

    /// Bytes buffered but not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Read from `src` until one full line is buffered and parse it.
    pub fn read_power<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<f32, CommError> {
        loop {
            if let Some(pos) = self.pending().iter().position(|&b| b == b'\n') {
                let line = self.take_line(pos);
                if self.discarding {
                    self.discarding = false;
                    debug!("Dropped tail of overlong line ({} bytes)", line.len());
                    continue;
                }
                return parse_power(&line);
            }

            if self.len == self.buf.len() {
                self.len = 0;
                if !self.discarding {
                    self.discarding = true;
                    return Err(CommError::Retry(self.buf.len()));
                }
                debug!("Dropped {} more bytes of overlong line", self.buf.len());
            }

            match src.read(&mut self.buf[self.len..]) {
                Ok(0) => return Err(CommError::Closed),
                Ok(n) => self.len += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(CommError::Timeout);
                }
                Err(e) => return Err(CommError::Read(e)),
            }
        }
    }

    /// Remove the line ending at `newline` (and the newline) from the buffer.
    fn take_line(&mut self, newline: usize) -> Vec<u8> {
        let line = self.buf[..newline].to_vec();
        self.buf.copy_within(newline + 1..self.len, 0);
        self.len -= newline + 1;
        line
    }
}

fn parse_power(line: &[u8]) -> Result<f32, CommError> {
    let text = String::from_utf8_lossy(line);
    text.trim()
        .parse::<f32>()
        .map_err(|_| CommError::Parse(text.into_owned()))
}
