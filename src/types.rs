//! Core record type definitions.
//!
//! Defines [`Role`] (who produced a memory), [`MemoryMetadata`] (the open
//! key-value map stored alongside every record), [`MemoryRecord`] and
//! [`MemoryResult`].

use serde::{Deserialize, Serialize};

/// Store-assigned record identifier. Monotonic, never reused.
pub type RecordId = i64;

/// Conversational role of the speaker a memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// Metadata attached to a record.
///
/// The recognized keys are typed fields; anything else a caller attaches is
/// kept verbatim in `extra` and round-trips through both backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// RFC 3339 creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Raw text before compression. Only set when `is_compressed` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_compressed: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryRecord {
    pub id: RecordId,
    /// Text actually indexed. May be a compressed surrogate of what the caller wrote.
    pub content: String,
    #[serde(skip_serializing)]
    pub vector: Vec<f32>,
    pub metadata: MemoryMetadata,
}

/// A record as seen by one search call.
///
/// `distance` is only comparable against other results of the same call.
/// Record fields are reachable directly through `Deref`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryResult {
    #[serde(flatten)]
    pub record: MemoryRecord,
    pub distance: f64,
}

impl std::ops::Deref for MemoryResult {
    type Target = MemoryRecord;

    fn deref(&self) -> &MemoryRecord {
        &self.record
    }
}
