//! Session, account, resource and credential records
//!
//! These mirror the shapes returned by the external data-access facade. The
//! broker only reads them; all mutation happens upstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a PAM session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Starting,
    Active,
    Ended,
}

/// A time- and scope-bounded grant to exercise a privileged account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub account_id: String,
    pub project_id: String,
    /// Absent means the session does not expire on its own
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Whether the session has passed its expiry instant.
    ///
    /// The boundary counts as expired: a session whose `expires_at` equals
    /// `now` is no longer usable.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}

/// A credential slot on a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub resource_id: String,
}

/// Kind of database a resource fronts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Postgres,
    Mysql,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Postgres => "postgres",
            ResourceKind::Mysql => "mysql",
        }
    }
}

/// A target database instance governed by PAM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    /// Gateway colocated with the resource; absent means the resource cannot
    /// be tunneled
    pub gateway_id: Option<String>,
}

/// Decrypted database credentials for one session
///
/// Postgres and MySQL resources share this shape; `ResourceKind` on the
/// resource record discriminates which driver consumes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCredentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub ssl_enabled: bool,
    pub ssl_reject_unauthorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_certificate: Option<String>,
}

/// Kind of principal acting on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActorType {
    User,
    Machine,
}

/// The principal a query is executed on behalf of
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub name: String,
}

impl Actor {
    /// The synthetic system actor the broker presents to the gateway service
    pub fn system_gateway() -> Self {
        Self {
            id: "system".to_string(),
            actor_type: ActorType::User,
            name: "PAM TCP Gateway".to_string(),
        }
    }
}
