//! CLI `context` command: print the context block a model would receive.

use anyhow::Result;

use memfabric::config::FabricConfig;

use super::ScopeArgs;

pub async fn context(config: &FabricConfig, query: &str, scope: &ScopeArgs) -> Result<()> {
    let fabric = super::open_fabric(config).await?;
    let attribution = scope.resolve(&fabric);

    let result = fabric.retrieve_context_with(&attribution, query).await;
    let stats = fabric.last_run();
    fabric.close().await?;
    let block = result?;

    if block.is_empty() {
        println!("(no relevant memories)");
    } else {
        println!("{block}");
    }

    if let Some(stats) = stats {
        println!();
        println!("Chunks:      {}", stats.context_chunks);
        println!("Time:        {} ms", stats.processing_time_ms);
        println!("Used query:  {}", stats.used_query);
    }
    Ok(())
}
