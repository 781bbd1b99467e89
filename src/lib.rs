//! # Ingest
//!
//! Multi-tenant ingestion of directory users and their mail from Google and
//! Microsoft into a local store, incrementally and idempotently.

pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod models;
pub mod providers;
pub mod repositories;
pub mod sync_service;
pub mod telemetry;
pub use migration;
