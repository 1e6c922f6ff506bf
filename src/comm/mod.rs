// Transport endpoints for remote power telemetry
//
// A `CommEndpoint` pairs a transport tag with the boxed variant that
// implements `Transport`. Callers only talk to the endpoint, so new
// transports can be added without touching them. Both current variants
// speak the same line protocol (see `line`).

pub mod bluetooth;
pub mod line;
pub mod serial;

use std::io::{self, Read};

use tracing::{info, warn};

pub use bluetooth::BluetoothTransport;
pub use line::LineBuffer;
pub use serial::SerialTransport;

use crate::status::{self, Status};

/// Error types for transport access
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("Transport is not open")]
    NotOpen,

    #[error("Invalid address {0:?}")]
    Address(String),

    #[error("Socket error: {0}")]
    Socket(#[source] io::Error),

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Read failed: {0}")]
    Read(#[source] io::Error),

    #[error("Timed out waiting for data")]
    Timeout,

    #[error("Connection closed by peer")]
    Closed,

    #[error("Unparseable power line {0:?}")]
    Parse(String),

    #[error("Line overflowed the {0}-byte buffer, retry")]
    Retry(usize),

    #[error("{0} transport is not supported on this platform")]
    Unsupported(&'static str),
}

impl CommError {
    /// The caller should repeat the same call.
    pub fn is_retry(&self) -> bool {
        matches!(self, CommError::Retry(_))
    }

    /// The connection is gone; the transport has been closed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CommError::Read(_) | CommError::Closed)
    }
}

impl Status for CommError {
    fn status(&self) -> i32 {
        if self.is_retry() {
            status::RETRY
        } else {
            status::COMM_ERROR
        }
    }
}

/// The operations every transport variant provides.
pub trait Transport: Send {
    fn open(&mut self) -> Result<(), CommError>;

    /// Close the connection. Closing a closed transport is not an error.
    fn close(&mut self) -> Result<(), CommError>;

    fn is_open(&self) -> bool;

    /// Read one power value. Fails with [`CommError::NotOpen`] without
    /// touching the connection when closed.
    fn get_power(&mut self) -> Result<f32, CommError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Bluetooth,
    Serial,
}

/// A transport endpoint. Dropping it closes the transport if still open.
pub struct CommEndpoint {
    kind: TransportKind,
    transport: Box<dyn Transport>,
}

impl CommEndpoint {
    pub fn new(kind: TransportKind, transport: Box<dyn Transport>) -> Self {
        Self { kind, transport }
    }

    /// Bluetooth RFCOMM endpoint for `address` (`XX:XX:XX:XX:XX:XX`).
    pub fn bluetooth(address: &str) -> Self {
        Self::new(
            TransportKind::Bluetooth,
            Box::new(BluetoothTransport::new(address)),
        )
    }

    pub fn serial(path: &str, baudrate: u32) -> Self {
        Self::new(
            TransportKind::Serial,
            Box::new(SerialTransport::new(path, baudrate)),
        )
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn open(&mut self) -> Result<(), CommError> {
        self.transport.open()
    }

    pub fn close(&mut self) -> Result<(), CommError> {
        self.transport.close()
    }

    pub fn get_power(&mut self) -> Result<f32, CommError> {
        self.transport.get_power()
    }

    /// Close if open, then release the endpoint.
    pub fn delete(mut self) -> Result<(), CommError> {
        if self.transport.is_open() {
            self.transport.close()
        } else {
            Ok(())
        }
    }
}

impl Drop for CommEndpoint {
    fn drop(&mut self) {
        if self.transport.is_open() {
            if let Err(e) = self.transport.close() {
                warn!("Failed to close {:?} transport on drop: {}", self.kind, e);
            }
        }
    }
}

/// An optional open stream plus its line buffer. The stream's presence is
/// the connection state.
#[derive(Debug)]
pub(crate) struct Link<S> {
    stream: Option<S>,
    lines: LineBuffer,
}

impl<S: Read> Link<S> {
    pub(crate) fn new() -> Self {
        Self {
            stream: None,
            lines: LineBuffer::new(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn attach(&mut self, stream: S) {
        self.lines.clear();
        self.stream = Some(stream);
    }

    /// Drop the stream (closing it). Returns whether one was open.
    pub(crate) fn detach(&mut self) -> bool {
        self.lines.clear();
        self.stream.take().is_some()
    }

    pub(crate) fn read_power(&mut self, peer: &str) -> Result<f32, CommError> {
        let stream = self.stream.as_mut().ok_or(CommError::NotOpen)?;
        let result = self.lines.read_power(stream);
        if let Err(e) = &result {
            if e.is_fatal() {
                info!("Lost connection to {}: {}", peer, e);
                self.detach();
            }
        }
        result
    }
}
