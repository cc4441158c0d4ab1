//! Stream socket channel.

use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;

use crate::endpoint::Endpoint;
use crate::transport::Channel;
use crate::transport::Error;
use crate::transport::Result;

/// A `Channel` over a TCP connection.
///
/// Writes are buffered locally and pushed on `sync`. Nagle is disabled so a
/// synced request leaves immediately.
pub struct TcpChannel {
    address: String,
    port: u16,
    listener: Option<TcpListener>,
    reader: Option<BufReader<TcpStream>>,
    writer: Option<BufWriter<TcpStream>>,
}

impl TcpChannel {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            listener: None,
            reader: None,
            writer: None,
        }
    }

    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        Self::new(endpoint.address.clone(), endpoint.port)
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let mut channel = Self::new(peer.ip().to_string(), peer.port());
        channel.attach(stream)?;
        Ok(channel)
    }

    /// Binds the listening socket ahead of `accept` and reports the bound address.
    ///
    /// Binding to port 0 picks a free port.
    pub fn listen(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }
        let listener = TcpListener::bind((self.address.as_str(), self.port))?;
        let local = listener.local_addr()?;
        tracing::debug!(%local, "tcp channel listening");
        self.listener = Some(listener);
        Ok(local)
    }

    fn attach(&mut self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let write_half = stream.try_clone()?;
        self.reader = Some(BufReader::new(stream));
        self.writer = Some(BufWriter::new(write_half));
        Ok(())
    }
}

impl Channel for TcpChannel {
    fn connect(&mut self) -> Result<()> {
        let stream = TcpStream::connect((self.address.as_str(), self.port))
            .map_err(|e| Error::ConnectionLost(format!("{}:{}: {}", self.address, self.port, e)))?;
        tracing::debug!(address = %self.address, port = self.port, "tcp channel connected");
        self.attach(stream)
    }

    fn accept(&mut self) -> Result<()> {
        self.listen()?;
        let listener = self.listener.as_ref().ok_or(Error::NotConnected)?;
        let (stream, peer) = listener.accept()?;
        tracing::debug!(%peer, "tcp channel accepted");
        self.attach(stream)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(Error::NotConnected)?;
        reader.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
        writer.write_all(buf)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "tcp"
    }
}
