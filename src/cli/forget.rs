use anyhow::Result;

use memfabric::config::FabricConfig;
use memfabric::types::RecordId;

/// Permanently delete one memory.
pub async fn forget(config: &FabricConfig, id: RecordId) -> Result<()> {
    let fabric = super::open_fabric(config).await?;
    let result = fabric.forget(id).await;
    fabric.close().await?;
    result?;

    println!("Deleted memory {id}");
    Ok(())
}
