//! Google provider client
//!
//! Users follow the Admin SDK Directory shape; messages follow a flattened
//! Gmail shape where address headers are raw strings like `"Name <addr>"`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Email, Provider, User};
use crate::providers::trait_::{ProviderClient, ProviderError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUserName {
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Directory API `users` resource (subset)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    #[serde(default)]
    pub primary_email: String,
    #[serde(default)]
    pub name: DirectoryUserName,
}

/// Gmail message with headers already lifted out of the payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// Milliseconds since the Unix epoch, as a decimal string
    pub internal_date: String,
}

/// Snapshot of a Google Workspace tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleDirectory {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
    #[serde(default)]
    pub messages: HashMap<String, Vec<GmailMessage>>,
}

pub const SAMPLE_SUNDAR_ID: &str = "104857395738291045821";

impl GoogleDirectory {
    /// Built-in demo tenant: one user and one message received two hours ago.
    pub fn sample() -> Self {
        let received = (Utc::now() - Duration::hours(2)).trunc_subsecs(0);
        let message = GmailMessage {
            id: "goog-456".to_string(),
            from: "Larry <larry@external.com>".to_string(),
            to: vec!["Sundar Pichai <sundar@google.example.com>".to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: "Confidential Request".to_string(),
            body: "Buy gift cards.".to_string(),
            internal_date: received.timestamp_millis().to_string(),
        };

        Self {
            users: vec![DirectoryUser {
                id: SAMPLE_SUNDAR_ID.to_string(),
                primary_email: "sundar@google.example.com".to_string(),
                name: DirectoryUserName {
                    full_name: Some("Sundar Pichai".to_string()),
                },
            }],
            messages: HashMap::from([(SAMPLE_SUNDAR_ID.to_string(), vec![message])]),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ProviderError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ProviderError::Unavailable {
            details: format!("failed to read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ProviderError::malformed(format!("invalid Google fixture {}: {}", path.display(), e))
        })
    }
}

/// Reduce an address header value to the bare address.
///
/// `"Larry Page <larry@example.com>"` becomes `larry@example.com`; a value
/// without angle brackets is returned trimmed.
pub fn extract_address(header: &str) -> String {
    let header = header.trim();
    match (header.rfind('<'), header.rfind('>')) {
        (Some(start), Some(end)) if start < end => header[start + 1..end].trim().to_string(),
        _ => header.trim_matches('"').to_string(),
    }
}

fn extract_all(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|h| extract_address(h))
        .filter(|a| !a.is_empty())
        .collect()
}

fn parse_internal_date(message: &GmailMessage) -> Result<DateTime<Utc>, ProviderError> {
    let millis: i64 = message.internal_date.trim().parse().map_err(|_| {
        ProviderError::malformed(format!(
            "message {} has invalid internalDate '{}'",
            message.id, message.internal_date
        ))
    })?;
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        ProviderError::malformed(format!(
            "message {} internalDate {} is out of range",
            message.id, millis
        ))
    })
}

/// Google Workspace provider client
#[derive(Debug, Clone)]
pub struct GoogleClient {
    directory: GoogleDirectory,
    mail_enabled: bool,
}

impl GoogleClient {
    /// Client with mail access disabled.
    pub fn new(directory: GoogleDirectory) -> Self {
        Self {
            directory,
            mail_enabled: false,
        }
    }

    pub fn with_mail_enabled(mut self, enabled: bool) -> Self {
        self.mail_enabled = enabled;
        self
    }

    pub fn mail_enabled(&self) -> bool {
        self.mail_enabled
    }

    fn map_user(tenant_id: Uuid, user: &DirectoryUser) -> Result<User, ProviderError> {
        if user.id.trim().is_empty() {
            return Err(ProviderError::malformed("Directory user without id"));
        }
        Ok(User {
            id: Uuid::new_v4(),
            tenant_id,
            external_user_id: user.id.clone(),
            email: user.primary_email.clone(),
            name: user
                .name
                .full_name
                .clone()
                .unwrap_or_else(|| user.primary_email.clone()),
            provider: Provider::Google,
        })
    }

    fn map_message(tenant_id: Uuid, message: &GmailMessage) -> Result<Email, ProviderError> {
        Ok(Email {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: Uuid::nil(),
            external_message_id: message.id.clone(),
            from: extract_address(&message.from),
            to: extract_all(&message.to),
            cc: extract_all(&message.cc),
            bcc: extract_all(&message.bcc),
            subject: message.subject.clone(),
            body: message.body.clone(),
            received_at: parse_internal_date(message)?,
            provider: Provider::Google,
        })
    }
}

#[async_trait]
impl ProviderClient for GoogleClient {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn fetch_users(&self, tenant_id: Uuid) -> Result<Vec<User>, ProviderError> {
        self.directory
            .users
            .iter()
            .map(|u| Self::map_user(tenant_id, u))
            .collect()
    }

    async fn fetch_emails(
        &self,
        tenant_id: Uuid,
        external_user_id: &str,
        received_after: DateTime<Utc>,
    ) -> Result<Vec<Email>, ProviderError> {
        if !self.mail_enabled {
            debug!(external_user_id, "Google mail access disabled; skipping");
            return Ok(Vec::new());
        }

        let Some(messages) = self.directory.messages.get(external_user_id) else {
            return Ok(Vec::new());
        };

        let mut emails = Vec::with_capacity(messages.len());
        for message in messages {
            let email = Self::map_message(tenant_id, message)?;
            if email.received_at > received_after {
                emails.push(email);
            }
        }

        debug!(
            external_user_id,
            count = emails.len(),
            since = %received_after,
            "Fetched Gmail messages"
        );
        Ok(emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::epoch;

    #[test]
    fn address_extraction() {
        assert_eq!(extract_address("Larry <larry@external.com>"), "larry@external.com");
        assert_eq!(extract_address("  bare@example.com "), "bare@example.com");
        assert_eq!(
            extract_address("\"Page, Larry\" <larry@example.com>"),
            "larry@example.com"
        );
        assert_eq!(extract_address(""), "");
    }

    #[tokio::test]
    async fn users_map_from_directory_shape() {
        let client = GoogleClient::new(GoogleDirectory::sample());
        let tenant_id = Uuid::new_v4();
        let users = client.fetch_users(tenant_id).await.unwrap();

        assert_eq!(users.len(), 1);
        assert_eq!(users[0].external_user_id, SAMPLE_SUNDAR_ID);
        assert_eq!(users[0].email, "sundar@google.example.com");
        assert_eq!(users[0].name, "Sundar Pichai");
        assert_eq!(users[0].provider, Provider::Google);
        assert_eq!(users[0].tenant_id, tenant_id);
    }

    #[tokio::test]
    async fn mail_disabled_returns_nothing() {
        let client = GoogleClient::new(GoogleDirectory::sample());
        assert!(!client.mail_enabled());
        let emails = client
            .fetch_emails(Uuid::new_v4(), SAMPLE_SUNDAR_ID, epoch())
            .await
            .unwrap();
        assert!(emails.is_empty());
    }

    #[tokio::test]
    async fn mail_enabled_returns_flattened_messages() {
        let client = GoogleClient::new(GoogleDirectory::sample()).with_mail_enabled(true);
        let emails = client
            .fetch_emails(Uuid::new_v4(), SAMPLE_SUNDAR_ID, epoch())
            .await
            .unwrap();

        assert_eq!(emails.len(), 1);
        let email = &emails[0];
        assert_eq!(email.external_message_id, "goog-456");
        assert_eq!(email.from, "larry@external.com");
        assert_eq!(email.to, vec!["sundar@google.example.com".to_string()]);
        assert_eq!(email.subject, "Confidential Request");
        assert_eq!(email.body, "Buy gift cards.");
        assert_eq!(email.received_at.timestamp_subsec_nanos(), 0);

        let after = client
            .fetch_emails(Uuid::new_v4(), SAMPLE_SUNDAR_ID, email.received_at)
            .await
            .unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn bad_internal_date_is_malformed() {
        let directory = GoogleDirectory {
            users: Vec::new(),
            messages: HashMap::from([(
                "u1".to_string(),
                vec![GmailMessage {
                    id: "m1".to_string(),
                    from: String::new(),
                    to: Vec::new(),
                    cc: Vec::new(),
                    bcc: Vec::new(),
                    subject: String::new(),
                    body: String::new(),
                    internal_date: "yesterday".to_string(),
                }],
            )]),
        };
        let client = GoogleClient::new(directory).with_mail_enabled(true);
        let err = client
            .fetch_emails(Uuid::new_v4(), "u1", epoch())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }

    #[test]
    fn directory_payload_deserializes() {
        let json = serde_json::json!({
            "users": [{"id": "42", "primaryEmail": "a@corp.example", "name": {"fullName": "A B"}}],
            "messages": {"42": [{"id": "g1", "from": "x@y.example", "internalDate": "1700000000000"}]}
        });
        let directory: GoogleDirectory = serde_json::from_value(json).unwrap();
        let email = GoogleClient::map_message(Uuid::nil(), &directory.messages["42"][0]).unwrap();
        assert_eq!(email.received_at.timestamp(), 1_700_000_000);
        assert!(email.to.is_empty());
    }
}
