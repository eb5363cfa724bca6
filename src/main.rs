mod cli;
mod server;
mod tools;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memfabric::config::FabricConfig;
use memfabric::types::{RecordId, Role};

use cli::ScopeArgs;

#[derive(Parser)]
#[command(name = "memfabric", version, about = "Attributed long-term memory for LLM applications")]
struct Cli {
    /// Config file (default: ~/.memfabric/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a memory
    Add {
        content: String,
        /// user, assistant, system or tool
        #[arg(long, default_value = "user")]
        role: Role,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Raw similarity search
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Print the context block for a query
    Context {
        query: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Permanently delete a memory
    Forget { id: RecordId },
    /// Show memory counts
    Stats {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Start the MCP server (stdio transport)
    Serve {
        /// Serve Streamable HTTP on [server] host/port instead of stdio
        #[arg(long)]
        http: bool,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.memfabric/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FabricConfig::load_from(path)?,
        None => FabricConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Add {
            content,
            role,
            scope,
        } => cli::add::add(&config, &content, role, &scope).await?,
        Command::Search {
            query,
            limit,
            scope,
        } => cli::search::search(&config, &query, limit, &scope).await?,
        Command::Context { query, scope } => {
            cli::context::context(&config, &query, &scope).await?
        }
        Command::Forget { id } => cli::forget::forget(&config, id).await?,
        Command::Stats { scope } => cli::stats::stats(&config, &scope).await?,
        Command::Serve { http } => {
            if http {
                server::serve_http(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}
