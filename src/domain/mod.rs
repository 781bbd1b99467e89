//! # Domain Model
//!
//! Provider-neutral value objects shared by every layer. Provider clients
//! produce them, the orchestrator stamps them, repositories persist them.
//! Users and emails are linked only through [`Email::user_id`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Upstream source of directory and mail data.
///
/// Also acts as the namespace for external identifiers: the same external id
/// under two providers denotes two different users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Google,
    Microsoft,
}

impl Provider {
    /// Every known provider, in slug order.
    pub const ALL: [Provider; 2] = [Provider::Google, Provider::Microsoft];

    /// Canonical slug, as stored in the `provider` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a slug does not name a known provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Provider::Google),
            "microsoft" => Ok(Provider::Microsoft),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// A directory user as seen by this system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Internal identifier. Placeholder when freshly fetched; canonical once
    /// read back from storage.
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Provider-native identifier, copied verbatim.
    pub external_user_id: String,
    pub email: String,
    pub name: String,
    pub provider: Provider,
}

/// A single received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Canonical internal id of the owning user. Nil until stamped by the
    /// sync service.
    pub user_id: Uuid,
    pub external_message_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub provider: Provider,
}

/// Watermark used when a tenant has no persisted mail: fetch everything.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}
