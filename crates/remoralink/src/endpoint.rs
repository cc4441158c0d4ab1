//! # Endpoint Resolution
//!
//! Turns the communicator section of a properties document into concrete
//! transport selections.
//!
//! Selection is positional: the `n`-th resolution picks the `n`-th suite. The
//! position is always explicit, either as an argument to `resolve` or held by an
//! owned `EndpointCursor`.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde::Deserialize;

/// Configuration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The suite names a transport this build doesn't know.
    UnsupportedSuite(String),
    /// There is no suite at the requested position.
    NoSuiteAt { index: usize, count: usize },
    /// A suite is missing a field or has one of the wrong shape.
    Malformed(String),
    /// The document could not be read.
    Io(String),
    /// The document is not valid JSON for the expected schema.
    Parse(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedSuite(name) => write!(f, "Suite '{}' is not supported", name),
            Self::NoSuiteAt { index, count } => {
                write!(f, "No communicator suite at position {} ({} configured)", index, count)
            }
            Self::Malformed(msg) => write!(f, "Malformed endpoint: {}", msg),
            Self::Io(msg) => write!(f, "Can't read configuration: {}", msg),
            Self::Parse(msg) => write!(f, "Can't parse configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of transports a suite can name.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum TransportKind {
    /// Conventional stream socket.
    Stream,
    /// RDMA-capable fabric.
    Rdma,
}

impl TransportKind {
    /// Maps a suite name from the properties document.
    pub fn from_suite(suite: &str) -> Option<Self> {
        match suite {
            "tcp/ip" => Some(Self::Stream),
            "infiniband-rdma" => Some(Self::Rdma),
            _ => None,
        }
    }

    pub fn suite(&self) -> &'static str {
        match self {
            Self::Stream => "tcp/ip",
            Self::Rdma => "infiniband-rdma",
        }
    }

    fn default_protocol(&self) -> &'static str {
        match self {
            Self::Stream => "tcp",
            Self::Rdma => "ib",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suite())
    }
}

/// A resolved transport selection plus its connection parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub kind: TransportKind,
    pub protocol: String,
    pub address: String,
    pub port: u16,
    /// Fabric device name (RDMA only).
    pub device: Option<String>,
    /// Fabric port number on the device (RDMA only).
    pub ib_port: Option<u8>,
    /// Module to build the channel from instead of the built-in implementation.
    pub plugin: Option<PathBuf>,
}

impl Endpoint {
    /// A stream endpoint with default parameters.
    pub fn stream(address: impl Into<String>, port: u16) -> Self {
        Self::new(TransportKind::Stream, address, port)
    }

    /// An RDMA endpoint with default parameters.
    pub fn rdma(address: impl Into<String>, port: u16) -> Self {
        Self::new(TransportKind::Rdma, address, port)
    }

    fn new(kind: TransportKind, address: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            protocol: kind.default_protocol().to_string(),
            address: address.into(),
            port,
            device: None,
            ib_port: None,
            plugin: None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.address, self.port)?;
        if let Some(device) = &self.device {
            write!(f, " on {}:{}", device, self.ib_port.unwrap_or(1))?;
        }
        Ok(())
    }
}

// ============================================================================
//  DOCUMENT SCHEMA
// ============================================================================

/// The properties document. Only the fields the core reads are modelled.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub communicator: Vec<Suite>,
    #[serde(default)]
    pub secure_application: bool,
}

/// One communicator entry.
#[derive(Clone, Debug, Deserialize)]
pub struct Suite {
    pub endpoint: RawEndpoint,
    /// Handler modules the backend should load for this suite.
    #[serde(default)]
    pub plugins: Vec<String>,
}

/// An endpoint as written in the document, before validation.
#[derive(Clone, Debug, Deserialize)]
pub struct RawEndpoint {
    pub suite: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default)]
    pub port: Option<Port>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub ib_port: Option<u8>,
    #[serde(default)]
    pub plugin: Option<PathBuf>,
}

/// Ports show up both as numbers and as strings in the wild.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Port {
    Number(i64),
    Text(String),
}

impl Port {
    fn parse(&self) -> Result<u16> {
        let parsed = match self {
            Port::Number(n) => u16::try_from(*n).ok(),
            Port::Text(s) => s.trim().parse::<u16>().ok(),
        };
        parsed.ok_or_else(|| Error::Malformed(format!("invalid port {:?}", self)))
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Parse(e.to_string()))
    }
}

impl Config {
    /// Reads and parses a properties document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        text.parse()
    }

    /// Number of configured suites.
    pub fn len(&self) -> usize {
        self.communicator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.communicator.is_empty()
    }
}

// ============================================================================
//  RESOLUTION
// ============================================================================

/// Builds the endpoint described by the suite at `index`.
pub fn resolve(config: &Config, index: usize) -> Result<Endpoint> {
    let suite = config.communicator.get(index).ok_or(Error::NoSuiteAt {
        index,
        count: config.communicator.len(),
    })?;
    let raw = &suite.endpoint;

    let kind = TransportKind::from_suite(&raw.suite)
        .ok_or_else(|| Error::UnsupportedSuite(raw.suite.clone()))?;
    let address = raw
        .server_address
        .clone()
        .ok_or_else(|| Error::Malformed(format!("suite {} has no server_address", index)))?;
    let port = raw
        .port
        .as_ref()
        .ok_or_else(|| Error::Malformed(format!("suite {} has no port", index)))?
        .parse()?;

    let mut endpoint = Endpoint::new(kind, address, port);
    if let Some(protocol) = &raw.protocol {
        endpoint.protocol = protocol.clone();
    }
    if kind == TransportKind::Rdma {
        endpoint.device = raw.device.clone();
        endpoint.ib_port = raw.ib_port;
    }
    endpoint.plugin = raw.plugin.clone();

    tracing::debug!(index, %endpoint, "resolved endpoint");
    Ok(endpoint)
}

/// Walks forward through the configured suites, one per successful resolution.
///
/// Owned explicitly by whoever needs ordered resolution; `reset` rewinds it.
#[derive(Debug, Default)]
pub struct EndpointCursor {
    position: AtomicUsize,
}

impl EndpointCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the cursor at a given suite.
    pub fn starting_at(position: usize) -> Self {
        Self { position: AtomicUsize::new(position) }
    }

    /// The suite the next call to `next` will resolve.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    /// Resolves the suite at the current position and advances past it.
    ///
    /// The position only moves when resolution succeeds. Concurrent callers
    /// each get a distinct suite.
    pub fn next(&self, config: &Config) -> Result<Endpoint> {
        let mut current = self.position.load(Ordering::Acquire);
        loop {
            let endpoint = resolve(config, current)?;
            match self.position.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(endpoint),
                Err(moved) => current = moved,
            }
        }
    }

    /// Rewinds to the first suite.
    pub fn reset(&self) {
        self.position.store(0, Ordering::Release);
    }
}
