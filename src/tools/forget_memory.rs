//! MCP `forget_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ForgetMemoryParams {
    #[schemars(description = "ID of the memory to delete")]
    pub memory_id: i64,

    #[schemars(description = "Why this memory is being forgotten (logged only)")]
    pub reason: Option<String>,
}
