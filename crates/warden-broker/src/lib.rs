//! Session-scoped query pipeline
//!
//! `Broker` is the public face of the query core: validate the session,
//! resolve credentials and gateway material, build the nested TLS tunnel,
//! bridge it to a loopback listener, run the statement through a native
//! driver, and tear everything down deterministically. It also owns the
//! tunnel registry and the direct connection pool for lifecycle and
//! introspection.

pub mod broker;
pub mod error;

pub use broker::{Broker, BrokerHealth, ExecuteQueryRequest, SessionHandshake};
pub use error::BrokerError;
