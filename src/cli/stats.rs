use anyhow::Result;

use memfabric::config::FabricConfig;

use super::ScopeArgs;

/// Display memory counts in the terminal.
pub async fn stats(config: &FabricConfig, scope: &ScopeArgs) -> Result<()> {
    let fabric = super::open_fabric(config).await?;
    let attribution = scope.resolve(&fabric);

    let total = fabric.count_all().await;
    let scoped = fabric.count_with(&attribution).await;
    fabric.close().await?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Backend:             {:?}", config.storage.backend);
    match config.storage.backend {
        memfabric::config::StorageBackend::Sqlite => {
            println!("  Database:            {}", config.storage.resolved_db_path().display());
        }
        memfabric::config::StorageBackend::Postgres => {
            println!("  Table:               {}", config.storage.table);
        }
    }
    println!("  Embedding model:     {}", config.embedding.model);
    println!("  Dimensions:          {}", config.embedding.dimensions);
    println!();
    println!("  Total memories:      {}", total?);
    println!(
        "  {:<21}{}",
        format!("{}/{}:", attribution.entity_id(), attribution.process_id()),
        scoped?
    );

    Ok(())
}
