//! Provider client trait definition
//!
//! Defines the uniform interface every provider implementation exposes to the
//! sync service, and the error type upstream fetches fail with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Email, Provider, User};

/// Provider-specific fetch failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Upstream throttled the request
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(" (retry after: {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// Network or connectivity error
    #[error("network error: {details}")]
    Network { details: String, retryable: bool },

    /// Upstream answered with data that cannot be mapped into the domain model
    #[error("malformed response: {details}")]
    MalformedResponse { details: String },

    /// The external user id is not a valid identifier for this provider
    #[error("invalid external user id '{external_user_id}': {reason}")]
    InvalidUserId {
        external_user_id: String,
        reason: String,
    },

    /// Upstream is unavailable for a non-transient reason
    #[error("provider unavailable: {details}")]
    Unavailable { details: String },
}

impl ProviderError {
    pub fn malformed<S: Into<String>>(details: S) -> Self {
        Self::MalformedResponse {
            details: details.into(),
        }
    }

    pub fn transient<S: Into<String>>(details: S) -> Self {
        Self::Network {
            details: details.into(),
            retryable: true,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::Network { retryable, .. } => *retryable,
            ProviderError::MalformedResponse { .. }
            | ProviderError::InvalidUserId { .. }
            | ProviderError::Unavailable { .. } => false,
        }
    }

    /// Upstream's requested delay before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Read capability over one provider's directory and mailboxes.
///
/// Implementations normalize every provider-native shape into the domain
/// model; nothing outside the implementation sees raw provider payloads.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// The provider variant this client serves.
    fn provider(&self) -> Provider;

    /// Fetch every user the provider knows for the tenant.
    ///
    /// Each user carries a freshly generated placeholder id; the canonical id
    /// is whatever storage already holds for the same external identity.
    async fn fetch_users(&self, tenant_id: Uuid) -> Result<Vec<User>, ProviderError>;

    /// Fetch one user's messages received strictly after `received_after`.
    ///
    /// Returned emails carry a nil `user_id`; the sync service stamps the
    /// canonical id before persisting.
    async fn fetch_emails(
        &self,
        tenant_id: Uuid,
        external_user_id: &str,
        received_after: DateTime<Utc>,
    ) -> Result<Vec<Email>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::RateLimited { retry_after_secs: None }.is_retryable());
        assert!(ProviderError::transient("reset by peer").is_retryable());
        assert!(
            !ProviderError::Network {
                details: "dns".to_string(),
                retryable: false
            }
            .is_retryable()
        );
        assert!(!ProviderError::malformed("bad json").is_retryable());
        assert!(
            !ProviderError::InvalidUserId {
                external_user_id: "x".to_string(),
                reason: "not a uuid".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn rate_limit_display_includes_retry_hint() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(err.to_string(), "rate limited (retry after: 30s)");
        assert_eq!(err.retry_after_secs(), Some(30));

        let err = ProviderError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "rate limited");
        assert_eq!(err.retry_after_secs(), None);
    }
}
