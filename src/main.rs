//! # Ingest CLI
//!
//! Bootstraps the schema and runs one sync per requested tenant against a
//! single provider.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use ingest::config::ConfigLoader;
use ingest::db::{health_check, init_pool};
use ingest::domain::Provider;
use ingest::providers::ProviderRegistry;
use ingest::repositories::{Repository, SqlRepository};
use ingest::sync_service::SyncService;
use ingest::telemetry::init_tracing;

#[derive(Debug, Parser)]
#[command(name = "ingest", version, about = "Sync directory users and mail into the local store")]
struct Cli {
    /// Provider to sync from (google or microsoft)
    #[arg(long, value_parser = parse_provider)]
    provider: Provider,

    /// Tenant to sync; repeat to sync several tenants concurrently.
    /// A random tenant is used when omitted.
    #[arg(long = "tenant")]
    tenants: Vec<Uuid>,

    /// Create the schema and exit
    #[arg(long)]
    init_only: bool,
}

fn parse_provider(value: &str) -> Result<Provider, String> {
    value.parse::<Provider>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every tenant synced successfully.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    init_tracing(&config)?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = init_pool(&config).await?;
    health_check(&db).await?;
    let repository = Arc::new(SqlRepository::new(Arc::new(db)));
    repository
        .init_schema()
        .await
        .context("failed to initialize schema")?;

    if cli.init_only {
        info!("Schema initialized");
        return Ok(true);
    }

    let registry = ProviderRegistry::from_config(&config)?;
    let service = Arc::new(SyncService::new(
        repository,
        registry,
        config.sync.clone(),
    ));

    let tenants = if cli.tenants.is_empty() {
        let tenant_id = Uuid::new_v4();
        info!(%tenant_id, "No tenant given; using a fresh tenant");
        vec![tenant_id]
    } else {
        cli.tenants
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling syncs");
            shutdown.cancel();
        }
    });

    let mut runs = JoinSet::new();
    for tenant_id in tenants {
        let service = service.clone();
        let cancel = cancel.clone();
        let provider = cli.provider;
        runs.spawn(async move {
            (
                tenant_id,
                service
                    .sync_tenant_with_cancel(tenant_id, provider, &cancel)
                    .await,
            )
        });
    }

    let mut all_ok = true;
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok((_, Ok(summary))) => {
                println!("{}", serde_json::to_string(&summary)?);
            }
            Ok((tenant_id, Err(err))) => {
                all_ok = false;
                eprintln!("tenant {tenant_id}: {err}");
            }
            Err(join_err) => {
                all_ok = false;
                eprintln!("sync task failed: {join_err}");
            }
        }
    }

    Ok(all_ok)
}
