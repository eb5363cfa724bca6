//! MCP server initialization for stdio and Streamable HTTP transports.
//!
//! Both entry points build one [`MemoryFabric`] from config, serve it, and
//! close it (draining queued writes) on shutdown.

use anyhow::Result;
use rmcp::ServiceExt;

use memfabric::config::FabricConfig;
use memfabric::fabric::MemoryFabric;

use crate::tools::FabricTools;

/// Build and initialize the fabric shared by every MCP session.
async fn setup_fabric(config: &FabricConfig) -> Result<MemoryFabric> {
    let fabric = MemoryFabric::from_config(config)?;
    fabric.init().await?;
    tracing::info!(
        backend = ?config.storage.backend,
        embedding = ?config.embedding.provider,
        compression = config.optimization.compression,
        reasoning = config.optimization.reasoning,
        "memory fabric ready"
    );
    Ok(fabric)
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: FabricConfig) -> Result<()> {
    tracing::info!("starting memfabric MCP server on stdio");

    let fabric = setup_fabric(&config).await?;
    let tools = FabricTools::new(fabric.clone());
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    fabric.close().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP transport.
pub async fn serve_http(config: FabricConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting memfabric MCP server on HTTP");

    let fabric = setup_fabric(&config).await?;
    let shared = fabric.clone();

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(FabricTools::new(shared.clone())),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    fabric.close().await?;
    Ok(())
}
