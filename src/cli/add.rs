//! CLI `add` command: store one memory.

use anyhow::Result;

use memfabric::config::FabricConfig;
use memfabric::types::Role;

use super::ScopeArgs;

pub async fn add(config: &FabricConfig, content: &str, role: Role, scope: &ScopeArgs) -> Result<()> {
    let fabric = super::open_fabric(config).await?;
    let attribution = scope.resolve(&fabric);

    let result = fabric.add_memory_with(&attribution, content, role).await;
    fabric.close().await?;
    let id = result?;

    println!(
        "Stored memory {id} for {}/{}",
        attribution.entity_id(),
        attribution.process_id()
    );
    Ok(())
}
