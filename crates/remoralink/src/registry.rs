//! Maps transport kinds to channel constructors.

use std::collections::HashMap;
use std::fmt;

use crate::endpoint::Endpoint;
use crate::endpoint::TransportKind;
use crate::rdma::RdmaChannel;
use crate::tcp::TcpChannel;
use crate::transport::Channel;
use crate::transport::Error;
use crate::transport::Result;

/// Builds an unconnected channel for an endpoint.
pub type Constructor = Box<dyn Fn(&Endpoint) -> Result<Box<dyn Channel>> + Send + Sync>;

/// Constructors keyed by transport kind.
///
/// `with_defaults` wires the built-in stream and RDMA channels. Registering a
/// kind again replaces its constructor, which is how loaded modules take over.
pub struct ChannelRegistry {
    constructors: HashMap<TransportKind, Constructor>,
}

impl ChannelRegistry {
    /// An empty registry. Every `create` fails until something is registered.
    pub fn new() -> Self {
        Self { constructors: HashMap::new() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TransportKind::Stream, |endpoint| {
            Ok(Box::new(TcpChannel::from_endpoint(endpoint)) as Box<dyn Channel>)
        });
        registry.register(TransportKind::Rdma, |endpoint| {
            Ok(Box::new(RdmaChannel::from_endpoint(endpoint)) as Box<dyn Channel>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: TransportKind, constructor: F)
    where
        F: Fn(&Endpoint) -> Result<Box<dyn Channel>> + Send + Sync + 'static,
    {
        if self.constructors.insert(kind, Box::new(constructor)).is_some() {
            tracing::debug!(%kind, "channel constructor replaced");
        }
    }

    pub fn contains(&self, kind: TransportKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Builds the channel for `endpoint`. The channel is not yet connected.
    pub fn create(&self, endpoint: &Endpoint) -> Result<Box<dyn Channel>> {
        let constructor = self
            .constructors
            .get(&endpoint.kind)
            .ok_or_else(|| Error::Unsupported(endpoint.kind.to_string()))?;
        constructor(endpoint)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}
