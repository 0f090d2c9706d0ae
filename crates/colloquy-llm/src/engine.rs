use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::response::EngineResponse;
use crate::turn::ConversationTurn;

// ---------------------------------------------------------------------------
// Associated page content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageContentKind {
    Text,
    VideoTranscript,
}

/// Page text or video-transcript content associated with a turn, subject to
/// the per-model length budget when a request is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub uuid: String,
    pub content: String,
    pub kind: PageContentKind,
}

// ---------------------------------------------------------------------------
// Tool definitions and capability
// ---------------------------------------------------------------------------

/// A tool descriptor forwarded to the backend. Execution logic lives in the
/// host; the core only relays definitions and outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments, passed through as-is.
    pub parameters: serde_json::Value,
    /// Whether calls to this tool must be confirmed by the user before the
    /// host executes them. Not sent on the wire.
    #[serde(default)]
    pub requires_user_permission: bool,
}

/// Opaque capability marker passed through to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCapability {
    #[default]
    Chat,
    Vision,
}

// ---------------------------------------------------------------------------
// Generation request
// ---------------------------------------------------------------------------

/// Everything an engine needs to assemble one outbound generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub history: Vec<ConversationTurn>,
    /// Page contents keyed by the uuid of the turn they are attached to.
    pub page_contents: HashMap<String, Vec<PageContent>>,
    pub selected_language: String,
    /// Temporary conversations never receive the user-memory context event.
    pub is_temporary: bool,
    pub tools: Vec<ToolDefinition>,
    pub preferred_tool_name: Option<String>,
    pub capability: RequestCapability,
}

// ---------------------------------------------------------------------------
// EngineConsumer
// ---------------------------------------------------------------------------

/// The capability contract any backend engine must satisfy.
///
/// `generate_assistant_response` returns a push-based [`EngineResponse`]:
/// a finite, cancelable sequence of entry events. The stream ending without
/// an `Err` item is the success signal; an `Err` item is terminal. Data
/// events always arrive strictly before the completion of their request.
#[async_trait]
pub trait EngineConsumer: Send + Sync {
    /// Translate conversation state into one backend request and stream the
    /// parsed response back as entry events.
    fn generate_assistant_response(&self, request: GenerationRequest) -> EngineResponse;

    /// Generate follow-up question suggestions from page content alone.
    ///
    /// A missing or empty completion from the backend is an internal error,
    /// never an empty list.
    async fn generate_question_suggestions(
        &self,
        page_contents: Vec<PageContent>,
        selected_language: &str,
    ) -> Result<Vec<String>, ApiError>;

    /// Abandon all in-flight queries. Fire-and-forget: live streams end
    /// early on their next poll, and the transport drops the connection.
    fn clear_all_queries(&self);

    /// Whether streamed completion events carry incremental text fragments
    /// (to be concatenated) rather than full replacements.
    fn supports_delta_text_responses(&self) -> bool {
        true
    }
}
