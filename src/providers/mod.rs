//! Provider clients
//!
//! - The `ProviderClient` trait every upstream implementation satisfies
//! - The registry used by the sync service to resolve a client
//! - Microsoft Graph and Google Workspace implementations

pub mod google;
pub mod microsoft;
pub mod registry;
pub mod trait_;

pub use google::{GoogleClient, GoogleDirectory};
pub use microsoft::{MicrosoftClient, MicrosoftDirectory};
pub use registry::{ProviderRegistry, RegistryError};
pub use trait_::{ProviderClient, ProviderError};
