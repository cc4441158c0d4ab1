//! # RDMA Channel
//!
//! Registered-region transport. Outgoing bytes are staged in a fixed-size send
//! region and posted to the peer as one work request when the region fills or on
//! `sync`. Incoming work requests land in a receive region that `read` drains.
//!
//! The fabric link underneath is a reliable connected stream, so each posted
//! region travels as `[u64 length][bytes]`. Device and port selection are carried
//! for diagnostics and for fabrics that need them.

use std::io::Read;
use std::io::Write;
use std::net::TcpListener;
use std::net::TcpStream;

use crate::endpoint::Endpoint;
use crate::transport::Channel;
use crate::transport::Error;
use crate::transport::Result;

/// Bytes per registered region.
pub const REGION_SIZE: usize = 64 * 1024;

pub struct RdmaChannel {
    address: String,
    port: u16,
    device: Option<String>,
    ib_port: u8,
    region_size: usize,
    link: Option<TcpStream>,
    send_region: Vec<u8>,
    recv_region: Vec<u8>,
    recv_cursor: usize,
    posts: u64,
}

impl RdmaChannel {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self::with_region_size(address, port, REGION_SIZE)
    }

    pub fn with_region_size(address: impl Into<String>, port: u16, region_size: usize) -> Self {
        let region_size = region_size.max(1);
        Self {
            address: address.into(),
            port,
            device: None,
            ib_port: 1,
            region_size,
            link: None,
            send_region: Vec::with_capacity(region_size),
            recv_region: Vec::with_capacity(region_size),
            recv_cursor: 0,
            posts: 0,
        }
    }

    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        let mut channel = Self::new(endpoint.address.clone(), endpoint.port);
        channel.device = endpoint.device.clone();
        if let Some(ib_port) = endpoint.ib_port {
            channel.ib_port = ib_port;
        }
        channel
    }

    /// Number of work requests posted so far.
    pub fn posts(&self) -> u64 {
        self.posts
    }

    pub fn region_size(&self) -> usize {
        self.region_size
    }

    /// Accepts on an already bound listener, for callers that need the bound
    /// port before the peer dials in.
    pub fn accept_on(&mut self, listener: &TcpListener) -> Result<()> {
        let (link, peer) = listener.accept()?;
        tracing::debug!(%peer, "rdma channel accepted");
        self.open(link)
    }

    fn open(&mut self, link: TcpStream) -> Result<()> {
        link.set_nodelay(true)?;
        tracing::debug!(
            device = self.device.as_deref().unwrap_or("default"),
            ib_port = self.ib_port,
            region = self.region_size,
            "rdma regions registered"
        );
        self.link = Some(link);
        Ok(())
    }

    fn post(&mut self) -> Result<()> {
        if self.send_region.is_empty() {
            return Ok(());
        }
        let link = self.link.as_mut().ok_or(Error::NotConnected)?;
        let len = self.send_region.len() as u64;
        link.write_all(&len.to_ne_bytes())?;
        link.write_all(&self.send_region)?;
        link.flush()?;
        self.send_region.clear();
        self.posts += 1;
        Ok(())
    }

    fn complete(&mut self) -> Result<()> {
        let link = self.link.as_mut().ok_or(Error::NotConnected)?;
        let mut header = [0u8; 8];
        link.read_exact(&mut header)?;
        let len = u64::from_ne_bytes(header) as usize;
        if len == 0 || len > self.region_size {
            return Err(Error::Protocol(format!(
                "work request of {} bytes for a {} byte region",
                len, self.region_size
            )));
        }
        self.recv_region.resize(len, 0);
        link.read_exact(&mut self.recv_region)?;
        self.recv_cursor = 0;
        Ok(())
    }
}

impl Channel for RdmaChannel {
    fn connect(&mut self) -> Result<()> {
        let link = TcpStream::connect((self.address.as_str(), self.port))
            .map_err(|e| Error::ConnectionLost(format!("{}:{}: {}", self.address, self.port, e)))?;
        self.open(link)
    }

    fn accept(&mut self) -> Result<()> {
        let listener = TcpListener::bind((self.address.as_str(), self.port))?;
        self.accept_on(&listener)
    }

    fn read(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            if self.recv_cursor == self.recv_region.len() {
                self.complete()?;
            }
            let available = &self.recv_region[self.recv_cursor..];
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            self.recv_cursor += n;
            buf = &mut buf[n..];
        }
        Ok(())
    }

    fn write(&mut self, mut buf: &[u8]) -> Result<()> {
        if self.link.is_none() {
            return Err(Error::NotConnected);
        }
        while !buf.is_empty() {
            let room = self.region_size - self.send_region.len();
            let n = room.min(buf.len());
            self.send_region.extend_from_slice(&buf[..n]);
            buf = &buf[n..];
            if self.send_region.len() == self.region_size {
                self.post()?;
            }
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.link.is_none() {
            return Err(Error::NotConnected);
        }
        self.post()
    }

    fn name(&self) -> &str {
        "rdma"
    }
}
