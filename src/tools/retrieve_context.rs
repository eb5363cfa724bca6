//! MCP `retrieve_context` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `retrieve_context` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RetrieveContextParams {
    /// The user turn or question the context is for.
    #[schemars(description = "The question or user turn to build context for")]
    pub query: String,

    #[schemars(description = "Tenant to search. Defaults to the server's configured entity.")]
    pub entity_id: Option<String>,

    #[schemars(description = "Process to search. Defaults to the server's configured process.")]
    pub process_id: Option<String>,
}
