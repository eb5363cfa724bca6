//! CLaRa optimization pipeline: compress on write, reason on read.
//!
//! Both stages are best-effort text transforms backed by a
//! [`TextGenerator`]. A stage never fails its caller: any generator error,
//! empty output, or missing generator leaves the input untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::generation::TextGenerator;

/// Instruction used by the compression stage when none is configured.
pub const DEFAULT_COMPRESSION_PROMPT: &str = "Compress the following memory into one dense, \
self-contained statement. Keep every name, number, date and fact; drop filler and pleasantries. \
Reply with the compressed text only.";

/// Marker phrase every default reasoning prompt starts with.
pub const REASONING_MARKER: &str = "Rewrite the following query";

/// Instruction used by the reasoning stage when none is configured.
pub const DEFAULT_REASONING_PROMPT: &str = "Rewrite the following query into a richer search key \
for semantic memory retrieval. Resolve vague references, spell out the underlying intent and add \
closely related terms. Reply with the rewritten query only.";

/// One optional generator-backed transform.
struct Stage {
    label: &'static str,
    enabled: bool,
    instruction: String,
    generator: Option<Arc<dyn TextGenerator>>,
    warned: AtomicBool,
}

impl Stage {
    fn new(
        label: &'static str,
        enabled: bool,
        instruction: Option<String>,
        default_instruction: &str,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self {
            label,
            enabled,
            instruction: instruction.unwrap_or_else(|| default_instruction.to_string()),
            generator,
            warned: AtomicBool::new(false),
        }
    }

    /// `Some(transformed)` on success, `None` when the input should be used as is.
    async fn apply(&self, text: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let Some(generator) = &self.generator else {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!(
                    stage = self.label,
                    "stage enabled but no generator configured; passing text through"
                );
            }
            return None;
        };

        let prompt = format!("{}\n\n{}", self.instruction, text);
        match generator.generate(&prompt).await {
            Ok(output) => {
                let output = output.trim();
                if output.is_empty() {
                    warn!(stage = self.label, generator = generator.name(), "generator returned empty text, using input");
                    None
                } else {
                    debug!(stage = self.label, input_len = text.len(), output_len = output.len(), "stage applied");
                    Some(output.to_string())
                }
            }
            Err(e) => {
                warn!(stage = self.label, generator = generator.name(), error = %e, "stage failed, using input");
                None
            }
        }
    }
}

/// Write-path stage: replaces content with a denser surrogate before indexing.
pub struct CompressionStage(Stage);

impl CompressionStage {
    pub fn new(
        enabled: bool,
        instruction: Option<String>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self(Stage::new(
            "compression",
            enabled,
            instruction,
            DEFAULT_COMPRESSION_PROMPT,
            generator,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.enabled
    }

    /// The compressed text, or `None` when the original should be indexed.
    pub async fn compress(&self, content: &str) -> Option<String> {
        self.0.apply(content).await
    }
}

/// Read-path stage: rewrites a query into a richer search key.
pub struct ReasoningStage(Stage);

impl ReasoningStage {
    pub fn new(
        enabled: bool,
        instruction: Option<String>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self(Stage::new(
            "reasoning",
            enabled,
            instruction,
            DEFAULT_REASONING_PROMPT,
            generator,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.enabled
    }

    /// The effective search key: the rewritten query, or `query` itself.
    pub async fn reason(&self, query: &str) -> String {
        self.0
            .apply(query)
            .await
            .unwrap_or_else(|| query.to_string())
    }
}

/// Both stages, as held by the orchestrator.
pub struct Clara {
    pub compression: CompressionStage,
    pub reasoning: ReasoningStage,
}

impl Clara {
    pub fn new(compression: CompressionStage, reasoning: ReasoningStage) -> Self {
        Self {
            compression,
            reasoning,
        }
    }
}
