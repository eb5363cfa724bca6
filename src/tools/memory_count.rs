//! MCP `memory_count` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `memory_count` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MemoryCountParams {
    #[schemars(description = "Tenant to count. Defaults to the server's configured entity.")]
    pub entity_id: Option<String>,

    #[schemars(description = "Process to count. Defaults to the server's configured process.")]
    pub process_id: Option<String>,

    #[schemars(description = "Count every tenant's memories instead (default: false)")]
    pub all: Option<bool>,
}
