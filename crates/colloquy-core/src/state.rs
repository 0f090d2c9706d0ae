//! Conversation-level state shared between the handler and its observers.

use colloquy_llm::ActionType;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

/// Lifecycle of a tool-use task within one conversation.
///
/// `None` means no tool batch is active. A streamed tool-use request moves
/// the task to `Running`; pause/resume toggle between `Running` and `Paused`;
/// an explicit stop lands on `Stopped`, which persists until the next
/// generation attempt begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    None,
    Running,
    Paused,
    Stopped,
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

/// A follow-up question offered to the user. Consumed on submit; the whole
/// set is discarded after the next assistant response completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub title: String,
    /// Text submitted in place of `title` when present.
    pub prompt: Option<String>,
    pub action_type: ActionType,
}

impl Suggestion {
    pub fn from_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            prompt: None,
            action_type: ActionType::SuggestedQuestion,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionGenerationStatus {
    #[default]
    None,
    CanGenerate,
    IsGenerating,
    HasGenerated,
}

// ---------------------------------------------------------------------------
// Token usage
// ---------------------------------------------------------------------------

/// Running token counters reported by the backend via content receipts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: u64,
    pub trimmed_tokens: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Caller-contract violations. Unlike backend [`ApiError`]s these are
/// returned directly to the caller instead of surfacing through the
/// conversation's error state.
///
/// [`ApiError`]: colloquy_llm::ApiError
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("conversation has no trailing human turn to take back")]
    NoHumanTurn,
}
