//! Provider registry
//!
//! Explicitly constructed map from [`Provider`] to its client. The registry is
//! built once at startup and handed to the sync service.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::Provider;
use crate::providers::google::{GoogleClient, GoogleDirectory};
use crate::providers::microsoft::{MicrosoftClient, MicrosoftDirectory};
use crate::providers::trait_::{ProviderClient, ProviderError};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider '{provider}' is not registered")]
    UnsupportedProvider { provider: Provider },
}

/// Registry of provider clients keyed by provider
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under the provider it reports, replacing any previous one.
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        let provider = client.provider();
        if self.clients.insert(provider, client).is_some() {
            warn!(%provider, "Replaced previously registered provider client");
        }
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.register(client);
        self
    }

    /// Look up the client for a provider
    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderClient>, RegistryError> {
        self.clients
            .get(&provider)
            .cloned()
            .ok_or(RegistryError::UnsupportedProvider { provider })
    }

    /// Registered providers, sorted by slug
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.clients.keys().copied().collect();
        providers.sort();
        providers
    }

    /// Build the default registry for the configured providers.
    ///
    /// Directories are read from `fixtures_dir` when set, otherwise the
    /// built-in samples are used.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let mut registry = Self::new();

        for provider in &config.enabled_providers {
            match provider {
                Provider::Microsoft => {
                    let directory = match &config.fixtures_dir {
                        Some(dir) => MicrosoftDirectory::from_json_file(&dir.join("microsoft.json"))?,
                        None => MicrosoftDirectory::sample(),
                    };
                    registry.register(Arc::new(MicrosoftClient::new(directory)));
                }
                Provider::Google => {
                    let directory = match &config.fixtures_dir {
                        Some(dir) => GoogleDirectory::from_json_file(&dir.join("google.json"))?,
                        None => GoogleDirectory::sample(),
                    };
                    let client =
                        GoogleClient::new(directory).with_mail_enabled(config.google_mail_enabled);
                    if !client.mail_enabled() {
                        info!("Google mail access disabled; only users will be synced");
                    }
                    registry.register(Arc::new(client));
                }
            }
        }

        Ok(registry)
    }
}
