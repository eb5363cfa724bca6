use serde::{Deserialize, Serialize};

use crate::store::SearchFilter;
use crate::types::MemoryMetadata;

/// Who a memory belongs to: the tenant (`entity_id`), the agent or process
/// acting for it, and optionally the conversation.
///
/// Immutable; build a new value to change tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribution {
    entity_id: String,
    process_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

impl Attribution {
    pub fn new(entity_id: impl Into<String>, process_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            process_id: process_id.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Search filter scoping reads to this tenant and process.
    ///
    /// The session is stamped on writes but does not narrow reads, so a new
    /// conversation still sees what earlier ones stored.
    pub fn filter(&self) -> SearchFilter {
        SearchFilter {
            entity_id: Some(self.entity_id.clone()),
            process_id: Some(self.process_id.clone()),
            ..Default::default()
        }
    }

    /// Write the attribution keys into record metadata. `fallback_session`
    /// is used when this attribution carries no session of its own.
    pub(crate) fn stamp(&self, metadata: &mut MemoryMetadata, fallback_session: &str) {
        metadata.entity_id = Some(self.entity_id.clone());
        metadata.process_id = Some(self.process_id.clone());
        metadata.session_id = Some(
            self.session_id
                .clone()
                .unwrap_or_else(|| fallback_session.to_string()),
        );
    }
}

impl Default for Attribution {
    fn default() -> Self {
        Self::new("default", "default")
    }
}
