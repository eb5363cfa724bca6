pub mod add_memory;
pub mod forget_memory;
pub mod memory_count;
pub mod retrieve_context;
pub mod search_memory;

use add_memory::AddMemoryParams;
use forget_memory::ForgetMemoryParams;
use memory_count::MemoryCountParams;
use retrieve_context::RetrieveContextParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use search_memory::SearchMemoryParams;

use memfabric::fabric::{Attribution, MemoryFabric};
use memfabric::types::Role;

const DEFAULT_SEARCH_LIMIT: usize = 10;

/// The memfabric MCP tool handler.
///
/// Every tool resolves its attribution from its own parameters, falling back
/// to the configured default, so concurrent clients never share tenant state.
#[derive(Clone)]
pub struct FabricTools {
    tool_router: ToolRouter<Self>,
    fabric: MemoryFabric,
    defaults: Attribution,
}

#[tool_router]
impl FabricTools {
    pub fn new(fabric: MemoryFabric) -> Self {
        let defaults = fabric.current_attribution();
        Self {
            tool_router: Self::tool_router(),
            fabric,
            defaults,
        }
    }

    fn resolve(&self, entity_id: Option<String>, process_id: Option<String>) -> Attribution {
        Attribution::new(
            entity_id.unwrap_or_else(|| self.defaults.entity_id().to_string()),
            process_id.unwrap_or_else(|| self.defaults.process_id().to_string()),
        )
    }

    /// Store a memory for a tenant.
    #[tool(description = "Store a memory. The text is embedded (and compressed if enabled) and attributed to entity_id/process_id.")]
    async fn add_memory(
        &self,
        Parameters(params): Parameters<AddMemoryParams>,
    ) -> Result<String, String> {
        let role: Role = match params.role.as_deref() {
            Some(r) => r.parse()?,
            None => Role::default(),
        };
        if params.content.trim().is_empty() {
            return Err("content must not be empty".into());
        }

        let mut attribution = self.resolve(params.entity_id, params.process_id);
        if let Some(session) = params.session_id {
            attribution = attribution.with_session(session);
        }

        tracing::info!(
            content_len = params.content.len(),
            role = %role,
            entity = attribution.entity_id(),
            "add_memory called"
        );

        if params.background.unwrap_or(false) {
            let accepted = self
                .fabric
                .queue_memory_with(attribution, params.content, role);
            return Ok(serde_json::json!({ "queued": accepted }).to_string());
        }

        let id = self
            .fabric
            .add_memory_with(&attribution, &params.content, role)
            .await
            .map_err(|e| format!("add_memory failed: {e}"))?;
        Ok(serde_json::json!({ "id": id }).to_string())
    }

    /// Raw similarity search, no query rewriting.
    #[tool(description = "Search a tenant's memories by natural language query. Returns results ranked by vector distance (smaller is closer).")]
    async fn search_memory(
        &self,
        Parameters(params): Parameters<SearchMemoryParams>,
    ) -> Result<String, String> {
        let attribution = self.resolve(params.entity_id, params.process_id);
        let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        tracing::info!(query = %params.query, limit, "search_memory called");

        let results = self
            .fabric
            .search_with(&attribution, &params.query, limit)
            .await
            .map_err(|e| format!("search failed: {e}"))?;

        serde_json::to_string(&serde_json::json!({
            "memories": results,
            "total": results.len(),
        }))
        .map_err(|e| format!("serialization failed: {e}"))
    }

    /// Context block for the next LLM turn.
    #[tool(description = "Build a context block of the most relevant memories for a query. Never fails on search errors; returns an empty context instead.")]
    async fn retrieve_context(
        &self,
        Parameters(params): Parameters<RetrieveContextParams>,
    ) -> Result<String, String> {
        let attribution = self.resolve(params.entity_id, params.process_id);
        let context = self
            .fabric
            .retrieve_context_with(&attribution, &params.query)
            .await
            .map_err(|e| format!("retrieve_context failed: {e}"))?;

        serde_json::to_string(&serde_json::json!({
            "context": context,
            "stats": self.fabric.last_run(),
        }))
        .map_err(|e| format!("serialization failed: {e}"))
    }

    /// Delete a memory by id.
    #[tool(description = "Permanently delete a memory by ID.")]
    async fn forget_memory(
        &self,
        Parameters(params): Parameters<ForgetMemoryParams>,
    ) -> Result<String, String> {
        tracing::info!(
            id = params.memory_id,
            reason = params.reason.as_deref().unwrap_or(""),
            "forget_memory called"
        );
        self.fabric
            .forget(params.memory_id)
            .await
            .map_err(|e| format!("forget failed: {e}"))?;
        Ok(serde_json::json!({ "deleted": params.memory_id }).to_string())
    }

    /// Count memories for a tenant, or overall.
    #[tool(description = "Count stored memories for entity_id/process_id, or across all tenants with all=true.")]
    async fn memory_count(
        &self,
        Parameters(params): Parameters<MemoryCountParams>,
    ) -> Result<String, String> {
        let count = if params.all.unwrap_or(false) {
            self.fabric.count_all().await
        } else {
            let attribution = self.resolve(params.entity_id, params.process_id);
            self.fabric.count_with(&attribution).await
        }
        .map_err(|e| format!("count failed: {e}"))?;
        Ok(serde_json::json!({ "count": count }).to_string())
    }
}

#[tool_handler]
impl ServerHandler for FabricTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "memfabric is an attributed long-term memory server. Use add_memory to save, \
                 retrieve_context before answering, and search_memory for raw results."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
