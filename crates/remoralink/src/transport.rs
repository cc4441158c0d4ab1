//! # Transport Abstraction
//!
//! A minimal, blocking interface for moving bytes between a frontend and a backend.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: A Channel knows nothing about routines, buffers or exit codes.
//!   It moves exact byte counts.
//! - **Blocking**: `read` returns once the whole slice is filled, `write` once the whole
//!   slice is accepted. There are no timeouts; a silent peer blocks the caller.
//! - **Explicit Flush**: Written bytes may sit in a local staging area until `sync`.
//!   A requester must `sync` before waiting for a reply.

use std::fmt;
use std::io;

use bytemuck::Pod;
use remorapack::WireBuffer;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// The channel was used before `connect` or `accept`.
    NotConnected,
    /// No implementation is available for the requested transport.
    Unsupported(String),
    /// The peer sent something the channel can't make sense of.
    Protocol(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::NotConnected => write!(f, "Channel is not connected"),
            Self::Unsupported(what) => write!(f, "Unsupported transport: {}", what),
            Self::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::ConnectionLost(_) => io::ErrorKind::UnexpectedEof,
            Error::NotConnected => io::ErrorKind::NotConnected,
            Error::Unsupported(_) => io::ErrorKind::Unsupported,
            Error::Protocol(_) => io::ErrorKind::InvalidData,
            Error::Io(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional, blocking byte channel.
///
/// This trait is object-safe (`Box<dyn Channel>`); the typed helpers live on
/// `dyn Channel` itself.
///
/// # Invariants
/// - `read` fills the entire slice or fails.
/// - `write` accepts the entire slice or fails.
/// - After `sync` returns, the peer can observe every byte written before it.
pub trait Channel: Send {
    /// Dials the peer described by the channel's endpoint.
    fn connect(&mut self) -> Result<()>;

    /// Waits for a peer to dial in on the channel's endpoint.
    fn accept(&mut self) -> Result<()>;

    /// Blocks until `buf.len()` bytes have been read.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Blocks until all of `buf` has been written.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Pushes staged bytes to the peer.
    fn sync(&mut self) -> Result<()>;

    /// Short transport name for diagnostics.
    fn name(&self) -> &str;
}

impl<'a> dyn Channel + 'a {
    /// Reads one fixed-size value in native byte order.
    pub fn read_value<T: Pod>(&mut self) -> Result<T> {
        let mut value: T = bytemuck::Zeroable::zeroed();
        self.read(bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Writes one fixed-size value in native byte order.
    pub fn write_value<T: Pod>(&mut self, value: T) -> Result<()> {
        self.write(bytemuck::bytes_of(&value))
    }

    /// Writes `buffer` in the framed `[u64 length][bytes]` layout.
    pub fn write_buffer(&mut self, buffer: &WireBuffer) -> remorapack::Result<()> {
        buffer.dump(&mut ChannelIo::new(self))
    }

    /// Replaces the contents of `buffer` with one framed payload.
    pub fn read_buffer(&mut self, buffer: &mut WireBuffer) -> remorapack::Result<()> {
        buffer.reset_from(&mut ChannelIo::new(self))
    }

    /// Adapts the channel to `std::io::Read + Write`.
    pub fn io(&mut self) -> ChannelIo<'_> {
        ChannelIo::new(self)
    }
}

/// `std::io` adapter over a channel, so buffers can drain from and dump to it.
///
/// `read` always fills the whole slice and `flush` maps to `sync`.
pub struct ChannelIo<'a> {
    channel: &'a mut dyn Channel,
}

impl<'a> ChannelIo<'a> {
    pub fn new(channel: &'a mut dyn Channel) -> Self {
        Self { channel }
    }
}

impl io::Read for ChannelIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.channel.read(buf)?;
        Ok(buf.len())
    }
}

impl io::Write for ChannelIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.sync()?;
        Ok(())
    }
}
