//! MCP `add_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `add_memory` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AddMemoryParams {
    #[schemars(description = "The natural language content to remember")]
    pub content: String,

    #[schemars(description = "Who said it: 'user', 'assistant', 'system' or 'tool'. Defaults to 'user'.")]
    pub role: Option<String>,

    /// Falls back to the server's configured entity.
    #[schemars(description = "Tenant the memory belongs to. Defaults to the server's configured entity.")]
    pub entity_id: Option<String>,

    #[schemars(description = "Agent or process writing the memory. Defaults to the server's configured process.")]
    pub process_id: Option<String>,

    #[schemars(description = "Conversation the memory came from")]
    pub session_id: Option<String>,

    #[schemars(description = "Return immediately and store in the background (default: false)")]
    pub background: Option<bool>,
}
