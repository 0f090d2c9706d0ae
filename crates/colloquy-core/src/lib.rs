//! Conversation orchestration: the handler that owns one conversation's
//! state, drives an engine, and notifies UI observers.

pub mod handler;
pub mod observer;
pub mod state;

pub use handler::{
    ConversationConfig, ConversationHandler, EngineFactory, PERMISSION_DENIED_OUTPUT,
};
pub use observer::{ConversationEntriesObserver, ConversationObserver, ObserverId};
pub use state::{StateError, Suggestion, SuggestionGenerationStatus, TaskState, TokenUsage};
