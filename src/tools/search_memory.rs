//! MCP `search_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(description = "Maximum results to return (default: 10)")]
    pub limit: Option<usize>,

    #[schemars(description = "Tenant to search. Defaults to the server's configured entity.")]
    pub entity_id: Option<String>,

    #[schemars(description = "Process to search. Defaults to the server's configured process.")]
    pub process_id: Option<String>,
}
