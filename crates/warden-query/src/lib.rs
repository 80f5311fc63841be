//! Driver-level query execution and the direct connection pool
//!
//! The executor opens a native driver connection (PostgreSQL or MySQL) to the
//! loopback bridge, runs exactly one statement, and normalizes the result.
//! The direct pool serves deployments where the database is reachable without
//! a tunnel: one long-lived, session-sticky connection per session with idle
//! eviction and health probing.

pub mod error;
pub mod executor;
mod mysql;
pub mod pool;
mod postgres;
mod tls;

pub use error::QueryError;
pub use executor::execute_query;
pub use pool::{
    DirectConnection, DirectConnectionPool, PooledConnectionInfo, DEFAULT_HEALTH_CHECK_INTERVAL,
    DEFAULT_MAX_IDLE,
};
