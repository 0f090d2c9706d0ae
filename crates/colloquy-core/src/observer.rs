//! Observer interfaces for conversation state changes.
//!
//! Two surfaces: [`ConversationObserver`] for the trusted UI collaborator
//! and [`ConversationEntriesObserver`] for a sandboxed rendering surface
//! that only sees history, progress, and task state.

use colloquy_llm::{ApiError, ConversationTurn};
use colloquy_store::Model;

use crate::state::{Suggestion, SuggestionGenerationStatus, TaskState};

/// Handle for a registered observer; pass back to the matching `remove_*`
/// method to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Full-surface observer. All methods have empty defaults so implementors
/// subscribe only to what they render.
pub trait ConversationObserver: Send + Sync {
    /// A turn changed (`Some`) or the history changed structurally and
    /// should be re-fetched wholesale (`None`).
    fn on_history_update(&self, _turn: Option<&ConversationTurn>) {}

    fn on_request_in_progress(&self, _in_progress: bool) {}

    fn on_api_error(&self, _error: ApiError) {}

    fn on_task_state_changed(&self, _state: TaskState) {}

    fn on_suggestions_changed(
        &self,
        _suggestions: &[Suggestion],
        _status: SuggestionGenerationStatus,
    ) {
    }

    fn on_model_data_changed(&self, _current_key: &str, _default_key: &str, _models: &[Model]) {}
}

/// Read-only observer for the sandboxed entries surface.
pub trait ConversationEntriesObserver: Send + Sync {
    fn on_history_update(&self, _turn: Option<&ConversationTurn>) {}

    fn on_request_in_progress(&self, _in_progress: bool) {}

    fn on_task_state_changed(&self, _state: TaskState) {}
}
