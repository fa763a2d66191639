//! `cleanup` subcommand: remove documents left over from earlier runs

use anyhow::{Result, anyhow};
use clap::Args;

use reindex_alippo::{DEFAULT_ADAPTER, adapter_for};
use reindex_core::{EntityType, TransactionKey, fmt_num};

use super::App;

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    #[arg(long, default_value = DEFAULT_ADAPTER)]
    pub adapter: String,

    /// Entity type to clean up (product, category, global)
    #[arg(long = "cleanupType", default_value = "product")]
    pub cleanup_type: String,

    /// Keep only documents stamped with this key; 0 refuses to clean up
    #[arg(long = "transactionKey", default_value = "0")]
    pub transaction_key: String,
}

pub fn parse_entity(name: &str) -> Result<EntityType> {
    EntityType::from_name(name.trim())
        .ok_or_else(|| anyhow!("unknown cleanup type '{name}' (expected product, category or global)"))
}

pub async fn run(args: CleanupArgs, app: &App) -> Result<()> {
    let entity = parse_entity(&args.cleanup_type)?;
    adapter_for(&args.adapter, entity)?;
    let key = TransactionKey::parse(&args.transaction_key);

    let runtime = app.runtime(None, false).await?;
    let deleted = runtime.cleanup(entity, key).await?;
    eprintln!("Removed {} {entity} documents", fmt_num(deleted as usize));
    app.drain(&runtime).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_types() {
        assert_eq!(parse_entity("product").unwrap(), EntityType::Course);
        assert_eq!(parse_entity("category").unwrap(), EntityType::Category);
        assert_eq!(parse_entity(" global ").unwrap(), EntityType::GlobalSearch);
        assert!(parse_entity("orders").is_err());
    }
}
