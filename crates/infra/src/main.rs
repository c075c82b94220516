//! `stockroom`: apply the warehouse schema and print current balances.
//!
//! Reads `STOCKROOM_DATABASE_URL` and the other `STOCKROOM_*` variables,
//! prints one JSON object per balance row on stdout and logs via tracing.

use std::sync::Arc;

use stockroom_infra::store::BalanceFilter;
use stockroom_infra::{StoreConfig, Warehouse};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockroom_observability::init();

    let config = StoreConfig::from_env()?;
    let store = config.connect().await?;
    tracing::info!("schema ready");

    let warehouse = Warehouse::new(Arc::new(store));
    let ctx = config.command_context();
    let balances = warehouse
        .queries
        .list_balances(&ctx, &BalanceFilter::default())
        .await?;

    for balance in &balances {
        println!("{}", serde_json::to_string(balance)?);
    }
    tracing::info!(rows = balances.len(), "balances listed");
    Ok(())
}
