//! # Remoralink
//!
//! Blocking byte channels between a call-forwarding frontend and the backend that
//! executes its routines, plus the configuration plumbing that picks one.
//!
//! ## Philosophy
//!
//! - **One Trait**: Every transport is a `Channel`. Nothing above this crate knows
//!   whether bytes travel over a socket or a registered memory region.
//! - **Closed Kinds, Open Implementations**: Suites map to a fixed `TransportKind`,
//!   but the constructor for each kind is looked up in a `ChannelRegistry` and may
//!   come from a loadable module.
//! - **Explicit Position**: Endpoint selection never hides a global counter.

pub mod endpoint;
pub mod rdma;
pub mod registry;
pub mod tcp;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;


pub use endpoint::Config;
pub use endpoint::Endpoint;
pub use endpoint::EndpointCursor;
pub use endpoint::TransportKind;
pub use rdma::RdmaChannel;
pub use registry::ChannelRegistry;
pub use tcp::TcpChannel;
pub use transport::Channel;
pub use transport::ChannelIo;
pub use transport::Error;
pub use transport::Result;
