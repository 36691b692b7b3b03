//! Command implementations.

pub mod demo;
pub mod migrate;
pub mod orders;
pub mod stock;

use anyhow::Context;
use serde::Serialize;

use stockledger_infra::{PostgresReceivingStore, PurchasingService, StoreConfig};

/// Connect to `DATABASE_URL` using the environment's pool and lock settings.
async fn connect() -> anyhow::Result<PostgresReceivingStore> {
    let config = StoreConfig::from_env()?;
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set (use `demo` for an in-memory run)")?;

    tracing::info!(max_connections = config.max_connections, "connecting to database");
    let store = PostgresReceivingStore::connect(url, config.max_connections, config.lock_timeout)
        .await
        .context("failed to connect to DATABASE_URL")?;
    Ok(store)
}

async fn service() -> anyhow::Result<PurchasingService<PostgresReceivingStore>> {
    Ok(PurchasingService::new(connect().await?))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
