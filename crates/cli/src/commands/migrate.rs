//! `stockledger migrate`: apply `crates/infra/migrations` to `DATABASE_URL`.

pub async fn run() -> anyhow::Result<()> {
    let store = super::connect().await?;

    tracing::info!("running migrations");
    store.migrate().await?;

    tracing::info!("migrations complete");
    Ok(())
}
