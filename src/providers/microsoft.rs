//! Microsoft provider client
//!
//! Serves users and messages from a Microsoft Graph shaped directory snapshot.
//! Graph nests every address inside `{ "emailAddress": { "address": .. } }`;
//! this module flattens those into plain address lists.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Email, Provider, User};
use crate::providers::trait_::{ProviderClient, ProviderError};

/// Graph `user` resource (subset)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEmailAddress {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRecipient {
    pub email_address: GraphEmailAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphItemBody {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Graph `message` resource (subset)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    pub id: String,
    #[serde(default)]
    pub from: Option<GraphRecipient>,
    #[serde(default)]
    pub to_recipients: Vec<GraphRecipient>,
    #[serde(default)]
    pub cc_recipients: Vec<GraphRecipient>,
    #[serde(default)]
    pub bcc_recipients: Vec<GraphRecipient>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<GraphItemBody>,
    pub received_date_time: DateTime<Utc>,
}

/// Snapshot of a Microsoft tenant: users plus messages keyed by Graph user id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MicrosoftDirectory {
    #[serde(default)]
    pub users: Vec<GraphUser>,
    #[serde(default)]
    pub messages: HashMap<String, Vec<GraphMessage>>,
}

/// Stable Graph ids used by [`MicrosoftDirectory::sample`].
pub const SAMPLE_SATYA_ID: &str = "6f1c2a9e-3b4d-4e5f-8a7b-1c2d3e4f5a6b";
pub const SAMPLE_PHIL_ID: &str = "9a8b7c6d-5e4f-4a3b-9c2d-1e0f9a8b7c6d";

impl MicrosoftDirectory {
    /// Built-in demo tenant: two users and one message received an hour ago.
    pub fn sample() -> Self {
        let received = (Utc::now() - Duration::hours(1)).trunc_subsecs(0);
        let message = GraphMessage {
            id: "msft-123".to_string(),
            from: Some(recipient("bill@external.com")),
            to_recipients: vec![recipient("satya@msft.example.com")],
            cc_recipients: Vec::new(),
            bcc_recipients: Vec::new(),
            subject: Some("Urgent Invoice".to_string()),
            body: Some(GraphItemBody {
                content_type: Some("text".to_string()),
                content: "Please pay this immediately.".to_string(),
            }),
            received_date_time: received,
        };

        Self {
            users: vec![
                GraphUser {
                    id: SAMPLE_SATYA_ID.to_string(),
                    display_name: Some("Satya Nadella".to_string()),
                    mail: Some("satya@msft.example.com".to_string()),
                    user_principal_name: None,
                },
                GraphUser {
                    id: SAMPLE_PHIL_ID.to_string(),
                    display_name: Some("Phil Spencer".to_string()),
                    mail: Some("phil@msft.example.com".to_string()),
                    user_principal_name: None,
                },
            ],
            messages: HashMap::from([(SAMPLE_SATYA_ID.to_string(), vec![message])]),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ProviderError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ProviderError::Unavailable {
            details: format!("failed to read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ProviderError::malformed(format!("invalid Microsoft fixture {}: {}", path.display(), e))
        })
    }
}

fn recipient(address: &str) -> GraphRecipient {
    GraphRecipient {
        email_address: GraphEmailAddress {
            address: address.to_string(),
            name: None,
        },
    }
}

fn flatten(recipients: &[GraphRecipient]) -> Vec<String> {
    recipients
        .iter()
        .map(|r| r.email_address.address.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

/// Microsoft Graph provider client
#[derive(Debug, Clone)]
pub struct MicrosoftClient {
    directory: MicrosoftDirectory,
}

impl MicrosoftClient {
    pub fn new(directory: MicrosoftDirectory) -> Self {
        Self { directory }
    }

    fn map_user(tenant_id: Uuid, user: &GraphUser) -> Result<User, ProviderError> {
        if user.id.trim().is_empty() {
            return Err(ProviderError::malformed("Graph user without id"));
        }
        let email = user
            .mail
            .clone()
            .or_else(|| user.user_principal_name.clone())
            .unwrap_or_default();

        Ok(User {
            id: Uuid::new_v4(),
            tenant_id,
            external_user_id: user.id.clone(),
            name: user.display_name.clone().unwrap_or_else(|| email.clone()),
            email,
            provider: Provider::Microsoft,
        })
    }

    fn map_message(tenant_id: Uuid, message: &GraphMessage) -> Email {
        Email {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: Uuid::nil(),
            external_message_id: message.id.clone(),
            from: message
                .from
                .as_ref()
                .map(|f| f.email_address.address.trim().to_string())
                .unwrap_or_default(),
            to: flatten(&message.to_recipients),
            cc: flatten(&message.cc_recipients),
            bcc: flatten(&message.bcc_recipients),
            subject: message.subject.clone().unwrap_or_default(),
            body: message
                .body
                .as_ref()
                .map(|b| b.content.clone())
                .unwrap_or_default(),
            received_at: message.received_date_time,
            provider: Provider::Microsoft,
        }
    }
}

#[async_trait]
impl ProviderClient for MicrosoftClient {
    fn provider(&self) -> Provider {
        Provider::Microsoft
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
        // Graph user ids are GUIDs; anything else cannot address a mailbox.
        let graph_id =
            Uuid::parse_str(external_user_id).map_err(|e| ProviderError::InvalidUserId {
                external_user_id: external_user_id.to_string(),
                reason: e.to_string(),
            })?;

        let Some(messages) = self
            .directory
            .messages
            .get(external_user_id)
            .or_else(|| self.directory.messages.get(&graph_id.to_string()))
        else {
            return Ok(Vec::new());
        };

        let emails: Vec<Email> = messages
            .iter()
            .filter(|m| m.received_date_time > received_after)
            .map(|m| Self::map_message(tenant_id, m))
            .collect();

        debug!(
            external_user_id,
            count = emails.len(),
            since = %received_after,
            "Fetched Microsoft messages"
        );
        Ok(emails)
    }
}
