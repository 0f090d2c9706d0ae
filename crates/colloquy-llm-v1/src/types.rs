//! Conversation API wire types.
//!
//! These are the raw JSON shapes sent to / received from the backend.
//! They are intentionally separate from the colloquy-llm public types.

use serde::{Deserialize, Serialize};

use colloquy_llm::RequestCapability;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct WireRequest {
    pub model: String,
    pub events: Vec<WireEvent>,
    pub language: String,
    pub stream: bool,
    pub capability: RequestCapability,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_tool_name: Option<String>,
}

/// One `{role, type, content}` event in the outbound event list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireEvent {
    pub role: WireRole,
    #[serde(rename = "type")]
    pub kind: WireEventKind,
    pub content: WireContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<WireMemory>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl WireEvent {
    /// An event with only role/type/content populated (the common case).
    pub fn simple(role: WireRole, kind: WireEventKind, content: WireContent) -> Self {
        Self {
            role,
            kind,
            content,
            memory: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WireEventKind {
    ChatMessage,
    RequestSummary,
    PageText,
    PageExcerpt,
    VideoTranscript,
    UserMemory,
    UploadImage,
    UploadScreenshot,
    UploadPdf,
    SkillDefinition,
    RequestSuggestedActions,
    ToolCalls,
    ToolUse,
}

/// Event content: a plain string, a list of data URLs (uploads), or a list
/// of structured blocks (tool results).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    List(Vec<String>),
    Blocks(Vec<WireContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContentBlock {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMemory {
    pub memories: Vec<String>,
}

/// A resolved tool call replayed on an assistant event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WireToolCallKind,
    pub function: WireFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireToolCallKind {
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireFunction {
    pub name: String,
    pub arguments: String,
}

/// A tool definition forwarded to the backend.
#[derive(Debug, Clone, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub kind: WireToolCallKind,
    pub function: WireToolSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Parsed from the `data:` payload of each streamed chunk.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireChunk {
    Completion {
        #[serde(default)]
        completion: String,
        #[serde(default)]
        tool_calls: Vec<WireToolCallDelta>,
    },
    IsSearching,
    SearchQueries {
        queries: Vec<String>,
    },
    WebSources {
        sources: Vec<WireSource>,
    },
    SelectedLanguage {
        language: String,
    },
    ConversationTitle {
        title: String,
    },
    ContentReceipt {
        #[serde(default)]
        total_tokens: u64,
        #[serde(default)]
        trimmed_tokens: u64,
    },
    #[serde(other)]
    Unknown,
}

/// An index-correlated fragment of a streamed tool call.
#[derive(Debug, Deserialize)]
pub struct WireToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub struct WireFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireSource {
    pub title: String,
    pub url: String,
}

/// The single JSON payload of a non-streaming request.
#[derive(Debug, Deserialize)]
pub struct WireCompletionResponse {
    #[serde(default)]
    pub completion: Option<String>,
}
