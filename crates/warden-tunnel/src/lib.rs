//! Nested TLS tunnel to the database gateway
//!
//! The broker reaches a database through two TLS legs: an outer, strictly
//! verified mTLS connection to the operator relay, and an inner mTLS
//! handshake to the gateway that runs over the outer stream and is selected
//! with ALPN. The inner leg is what carries database wire-protocol bytes; the
//! relay never sees them in the clear.
//!
//! A loopback bridge exposes the inner stream as a plain TCP listener so that
//! stock database drivers can dial `127.0.0.1` and speak their native
//! protocol through the tunnel.

pub mod bridge;
pub mod error;
pub mod registry;
pub mod tls;

pub use bridge::LocalBridge;
pub use error::TunnelError;
pub use registry::{TunnelHandle, TunnelInfo, TunnelRegistry};
pub use tls::{EstablishedTunnel, TunnelBuilder, TunnelStream};
