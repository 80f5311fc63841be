//! Credential and gateway resolution for the query pipeline
//!
//! Narrow contracts over the external collaborators (session/account/resource
//! stores, credential vault, gateway service) plus the resolver that turns a
//! session id into everything the tunnel builder and query executor need.

pub mod error;
pub mod resolver;
pub mod stores;

pub use error::AccessError;
pub use resolver::{ResolvedQueryContext, Resolver};
pub use stores::{
    AccountStore, CredentialVault, GatewayService, PamConnectionRequest, ResourceStore,
    SessionCredentials, SessionStore,
};
