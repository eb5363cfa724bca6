use anyhow::Result;

use memfabric::config::FabricConfig;

use super::ScopeArgs;

/// Run a raw similarity search from the terminal.
pub async fn search(config: &FabricConfig, query: &str, limit: usize, scope: &ScopeArgs) -> Result<()> {
    let fabric = super::open_fabric(config).await?;
    let attribution = scope.resolve(&fabric);

    let result = fabric.search_with(&attribution, query, limit).await;
    fabric.close().await?;
    let results = result?;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", results.len());
    for (i, result) in results.iter().enumerate() {
        let preview = if result.content.chars().count() > 120 {
            format!("{}...", result.content.chars().take(120).collect::<String>())
        } else {
            result.content.clone()
        };
        let role = result
            .metadata
            .role
            .map(|r| r.as_str())
            .unwrap_or("-");

        println!(
            "  {}. #{} [{}] (distance: {:.4}){}",
            i + 1,
            result.id,
            role,
            result.distance,
            if result.metadata.is_compressed == Some(true) { " compressed" } else { "" },
        );
        println!("     {}", preview);
        println!();
    }

    Ok(())
}
