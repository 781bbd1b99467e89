//! # Data Models
//!
//! SeaORM entities for the ingestion store. These mirror the `users` and
//! `emails` tables created by the `migration` crate; the provider-neutral
//! domain types live in [`crate::domain`].

pub mod email;
pub mod user;
