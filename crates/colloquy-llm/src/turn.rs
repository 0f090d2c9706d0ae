use std::time::SystemTime;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Turn classification
// ---------------------------------------------------------------------------

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterType {
    Human,
    Assistant,
}

/// What kind of request or response a turn represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Unspecified,
    Query,
    Summarize,
    SuggestedQuestion,
    Response,
}

// ---------------------------------------------------------------------------
// Structured entry events
// ---------------------------------------------------------------------------

/// One structured unit within an assistant turn. Exactly one variant is
/// populated per instance; a turn's `events` list preserves arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConversationEntryEvent {
    /// A chunk (or, for non-delta engines, a full replacement) of
    /// assistant text.
    Completion { text: String },

    /// A function-calling request from the model. Pending while `output`
    /// is unset; resolved once the host supplies it.
    ToolUse(ToolUseEvent),

    /// The backend started or stopped searching.
    SearchStatus { is_searching: bool },

    /// Search queries the backend issued on the user's behalf.
    SearchQueries { queries: Vec<String> },

    /// Source citations for the response.
    Sources { sources: Vec<WebSource> },

    /// The backend proposed a conversation title.
    TitleUpdate { title: String },

    /// The backend detected the conversation language.
    SelectedLanguage { language: String },

    /// Token accounting for the request that produced this turn.
    ContentReceipt {
        total_tokens: u64,
        trimmed_tokens: u64,
    },
}

/// A function-calling request emitted by the backend model. Execution is
/// host-mediated: the core only records the request and its eventual output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseEvent {
    /// Backend-assigned call id, used to correlate request and result.
    pub id: String,
    pub tool_name: String,
    /// Raw JSON arguments string, as produced by the model.
    pub arguments_json: String,
    /// `None` while the call is pending; set exactly once when resolved.
    pub output: Option<Vec<ContentBlock>>,
    /// Whether the host must ask the user before executing this call.
    pub permission_challenge: bool,
}

impl ToolUseEvent {
    /// A resolved call is excluded from further pending-loop checks.
    pub fn is_pending(&self) -> bool {
        self.output.is_none()
    }
}

/// One block of tool-result content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    /// An image as a data URL.
    Image { url: String },
}

/// A cited source for an assistant response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    pub title: String,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Uploaded files and skills
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadedFileKind {
    Image,
    Screenshot,
    Pdf,
}

/// A file the user attached to a human turn. `data` is a ready-made data
/// URL; no decoding happens inside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub data: String,
    pub kind: UploadedFileKind,
}

/// A user-defined shortcut/prompt template attachable to a human turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    /// The prompt template text sent to the backend as a skill definition.
    pub definition: String,
}

// ---------------------------------------------------------------------------
// ConversationTurn
// ---------------------------------------------------------------------------

/// One message in a conversation's history.
///
/// Only assistant turns accumulate `events`; only human turns accumulate
/// `edits`. An edit is a full alternate version of the turn — the original
/// is never overwritten, and the most recent edit wins when the prompt text
/// is extracted for a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub uuid: String,
    pub character_type: CharacterType,
    pub action_type: ActionType,
    pub text: String,
    /// User-selected page text attached to this turn, if any.
    pub selected_text: Option<String>,
    pub events: Vec<ConversationEntryEvent>,
    pub edits: Vec<ConversationTurn>,
    pub uploaded_files: Vec<UploadedFile>,
    pub skill: Option<Skill>,
    /// Per-turn model override; supersedes the conversation default for the
    /// request this turn triggers.
    pub model_key: Option<String>,
    pub created_time: SystemTime,
}

impl ConversationTurn {
    /// The text a generation request should use: the most recent edit's
    /// text if any edits exist, else the original.
    pub fn latest_text(&self) -> &str {
        self.edits.last().map_or(self.text.as_str(), |e| &e.text)
    }

    /// Tool-use events that are still awaiting an output.
    pub fn pending_tool_uses(&self) -> impl Iterator<Item = &ToolUseEvent> {
        self.events.iter().filter_map(|event| match event {
            ConversationEntryEvent::ToolUse(tool_use) if tool_use.is_pending() => Some(tool_use),
            _ => None,
        })
    }

    /// Tool-use events that have an output attached.
    pub fn resolved_tool_uses(&self) -> impl Iterator<Item = &ToolUseEvent> {
        self.events.iter().filter_map(|event| match event {
            ConversationEntryEvent::ToolUse(tool_use) if !tool_use.is_pending() => Some(tool_use),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn human_turn(text: &str) -> ConversationTurn {
        ConversationTurn {
            uuid: "t1".into(),
            character_type: CharacterType::Human,
            action_type: ActionType::Query,
            text: text.into(),
            selected_text: None,
            events: Vec::new(),
            edits: Vec::new(),
            uploaded_files: Vec::new(),
            skill: None,
            model_key: None,
            created_time: SystemTime::now(),
        }
    }

    #[test]
    fn latest_text_prefers_most_recent_edit() {
        let mut turn = human_turn("original");
        assert_eq!(turn.latest_text(), "original");

        let mut first = human_turn("first edit");
        first.uuid = turn.uuid.clone();
        let mut second = human_turn("second edit");
        second.uuid = turn.uuid.clone();
        turn.edits.push(first);
        turn.edits.push(second);

        assert_eq!(turn.latest_text(), "second edit");
        assert_eq!(turn.text, "original");
    }

    #[test]
    fn pending_scan_skips_resolved_calls() {
        let mut turn = human_turn("q");
        turn.character_type = CharacterType::Assistant;
        turn.events.push(ConversationEntryEvent::ToolUse(ToolUseEvent {
            id: "a".into(),
            tool_name: "lookup".into(),
            arguments_json: "{}".into(),
            output: Some(vec![ContentBlock::Text { text: "ok".into() }]),
            permission_challenge: false,
        }));
        turn.events.push(ConversationEntryEvent::ToolUse(ToolUseEvent {
            id: "b".into(),
            tool_name: "lookup".into(),
            arguments_json: "{}".into(),
            output: None,
            permission_challenge: false,
        }));

        let pending: Vec<_> = turn.pending_tool_uses().map(|t| t.id.as_str()).collect();
        assert_eq!(pending, ["b"]);
        let resolved: Vec<_> = turn.resolved_tool_uses().map(|t| t.id.as_str()).collect();
        assert_eq!(resolved, ["a"]);
    }
}
