//! The conversation orchestrator.
//!
//! [`ConversationHandler`] is the single source of truth for one
//! conversation's mutable state and the sole entry point for user-initiated
//! operations. It drives the engine, assembles streamed responses into
//! assistant turns, runs the tool-use loop, and fans state changes out to
//! registered observers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use colloquy_llm::{
    ActionType, ApiError, CharacterType, ContentBlock, ConversationEntryEvent, ConversationTurn,
    EngineConsumer, GenerationRequest, PageContent, RequestCapability, Skill, ToolDefinition,
    UploadedFile, UploadedFileKind,
};
use colloquy_store::{Model, ModelStore};
use parking_lot::Mutex;
use tokio_stream::StreamExt;

use crate::observer::{ConversationEntriesObserver, ConversationObserver, ObserverId};
use crate::state::{StateError, Suggestion, SuggestionGenerationStatus, TaskState, TokenUsage};

/// Output written to a tool-use event when the user denies its permission
/// challenge.
pub const PERMISSION_DENIED_OUTPUT: &str =
    "Permission to use this tool with these arguments was denied by the user.";

const SUMMARIZE_PAGE_PROMPT: &str = "Summarize this page";

// ---------------------------------------------------------------------------
// Engine factory
// ---------------------------------------------------------------------------

/// Constructs engines on demand. Switching the conversation's model creates
/// a fresh engine through this factory, discarding any engine-side query
/// state along with the old instance.
pub trait EngineFactory: Send + Sync {
    fn create_engine(&self, model_key: &str) -> Arc<dyn EngineConsumer>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ConversationConfig {
    /// Conversation id; generated when absent.
    pub uuid: Option<String>,
    /// Initial model; the store's default when absent.
    pub model_key: Option<String>,
    pub selected_language: String,
    /// Temporary conversations never attach user memory.
    pub is_temporary: bool,
}

// ---------------------------------------------------------------------------
// Inner state
// ---------------------------------------------------------------------------

struct Inner {
    title: String,
    selected_language: String,
    model_key: String,
    engine: Arc<dyn EngineConsumer>,
    history: Vec<ConversationTurn>,
    page_contents: HashMap<String, Vec<PageContent>>,
    skills: Vec<Skill>,
    tools: Vec<ToolDefinition>,
    preferred_tool_name: Option<String>,
    is_request_in_progress: bool,
    current_error: Option<ApiError>,
    task_state: TaskState,
    is_tool_use_in_progress: bool,
    suggestions: Vec<Suggestion>,
    suggestion_status: SuggestionGenerationStatus,
    token_usage: TokenUsage,
    ratings: HashMap<String, bool>,
    /// Monotonic counter identifying the current generation attempt.
    /// Callbacks carrying an older value are stale and must be ignored.
    request_generation: u64,
    observers: HashMap<u64, Arc<dyn ConversationObserver>>,
    entries_observers: HashMap<u64, Arc<dyn ConversationEntriesObserver>>,
    next_observer_id: u64,
}

/// Outcome of applying one streamed engine event.
enum Applied {
    /// The event belongs to a superseded generation.
    Stale,
    /// The current assistant turn changed; `task_entered` marks the
    /// `None -> Running` task transition.
    Updated {
        turn: ConversationTurn,
        task_entered: bool,
    },
    /// Conversation metadata changed; no turn content was touched.
    Metadata,
}

enum Outcome {
    Stale,
    Failed(ApiError, bool),
    SuspendedPendingTools,
    Complete {
        task_changed: bool,
        suggestions_changed: bool,
    },
}

// ---------------------------------------------------------------------------
// ConversationHandler
// ---------------------------------------------------------------------------

pub struct ConversationHandler {
    uuid: String,
    is_temporary: bool,
    model_store: Arc<ModelStore>,
    engine_factory: Arc<dyn EngineFactory>,
    inner: Mutex<Inner>,
}

impl ConversationHandler {
    pub fn new(
        config: ConversationConfig,
        engine_factory: Arc<dyn EngineFactory>,
        model_store: Arc<ModelStore>,
    ) -> Self {
        let model_key = config.model_key.unwrap_or_else(|| model_store.default_key());
        let engine = engine_factory.create_engine(&model_key);
        Self {
            uuid: config.uuid.unwrap_or_else(new_uuid),
            is_temporary: config.is_temporary,
            model_store,
            engine_factory,
            inner: Mutex::new(Inner {
                title: String::new(),
                selected_language: config.selected_language,
                model_key,
                engine,
                history: Vec::new(),
                page_contents: HashMap::new(),
                skills: Vec::new(),
                tools: Vec::new(),
                preferred_tool_name: None,
                is_request_in_progress: false,
                current_error: None,
                task_state: TaskState::None,
                is_tool_use_in_progress: false,
                suggestions: Vec::new(),
                suggestion_status: SuggestionGenerationStatus::None,
                token_usage: TokenUsage::default(),
                ratings: HashMap::new(),
                request_generation: 0,
                observers: HashMap::new(),
                entries_observers: HashMap::new(),
                next_observer_id: 0,
            }),
        }
    }

    // -- getters ------------------------------------------------------------

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    pub fn title(&self) -> String {
        self.inner.lock().title.clone()
    }

    pub fn selected_language(&self) -> String {
        self.inner.lock().selected_language.clone()
    }

    pub fn model_key(&self) -> String {
        self.inner.lock().model_key.clone()
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.inner.lock().history.clone()
    }

    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.inner.lock().suggestions.clone()
    }

    pub fn suggestion_status(&self) -> SuggestionGenerationStatus {
        self.inner.lock().suggestion_status
    }

    pub fn is_request_in_progress(&self) -> bool {
        self.inner.lock().is_request_in_progress
    }

    pub fn current_error(&self) -> Option<ApiError> {
        self.inner.lock().current_error
    }

    pub fn task_state(&self) -> TaskState {
        self.inner.lock().task_state
    }

    pub fn is_tool_use_in_progress(&self) -> bool {
        self.inner.lock().is_tool_use_in_progress
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.inner.lock().token_usage
    }

    pub fn rating_for(&self, turn_uuid: &str) -> Option<bool> {
        self.inner.lock().ratings.get(turn_uuid).copied()
    }

    /// Re-derived from the current assistant turn's events on every call.
    pub fn has_pending_tool_use_requests(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .history
            .last()
            .filter(|turn| turn.character_type == CharacterType::Assistant)
            .is_some_and(|turn| turn.pending_tool_uses().next().is_some())
    }

    // -- collaborator wiring ------------------------------------------------

    pub fn set_skills(&self, skills: Vec<Skill>) {
        self.inner.lock().skills = skills;
    }

    pub fn set_tools(&self, tools: Vec<ToolDefinition>) {
        self.inner.lock().tools = tools;
    }

    pub fn set_preferred_tool_name(&self, name: Option<String>) {
        self.inner.lock().preferred_tool_name = name;
    }

    /// Associate page content with a turn; replaces any prior content for
    /// that turn.
    pub fn attach_page_content(&self, turn_uuid: impl Into<String>, contents: Vec<PageContent>) {
        self.inner.lock().page_contents.insert(turn_uuid.into(), contents);
    }

    // -- observers ----------------------------------------------------------

    pub fn add_observer(&self, observer: Arc<dyn ConversationObserver>) -> ObserverId {
        let mut inner = self.inner.lock();
        let id = inner.next_observer_id;
        inner.next_observer_id += 1;
        inner.observers.insert(id, observer);
        ObserverId(id)
    }

    pub fn remove_observer(&self, id: ObserverId) {
        self.inner.lock().observers.remove(&id.0);
    }

    pub fn add_entries_observer(&self, observer: Arc<dyn ConversationEntriesObserver>) -> ObserverId {
        let mut inner = self.inner.lock();
        let id = inner.next_observer_id;
        inner.next_observer_id += 1;
        inner.entries_observers.insert(id, observer);
        ObserverId(id)
    }

    pub fn remove_entries_observer(&self, id: ObserverId) {
        self.inner.lock().entries_observers.remove(&id.0);
    }

    // -- submission ---------------------------------------------------------

    /// Append a human turn and generate a response. Ignored while a request
    /// is in progress or when both text and files are empty. A suggestion
    /// whose title matches the submitted text is consumed.
    pub async fn submit_human_conversation_entry(
        &self,
        text: impl Into<String>,
        files: Vec<UploadedFile>,
    ) {
        let text = text.into();
        if text.trim().is_empty() && files.is_empty() {
            tracing::debug!("submission ignored: empty input");
            return;
        }
        let consumed = {
            let mut inner = self.inner.lock();
            if inner.is_request_in_progress {
                tracing::debug!("submission ignored: request in progress");
                return;
            }
            match inner.suggestions.iter().position(|s| s.title == text) {
                Some(index) => {
                    inner.suggestions.remove(index);
                    true
                }
                None => false,
            }
        };
        if consumed {
            self.notify_suggestions();
        }
        self.push_human_turn_and_generate(text, ActionType::Query, files, None)
            .await;
    }

    pub async fn submit_human_conversation_entry_with_action(
        &self,
        text: impl Into<String>,
        action_type: ActionType,
    ) {
        let text = text.into();
        if text.trim().is_empty() {
            tracing::debug!("submission ignored: empty input");
            return;
        }
        self.push_human_turn_and_generate(text, action_type, Vec::new(), None)
            .await;
    }

    /// Submit with an attached skill from the injected catalog. An unknown
    /// skill id is ignored.
    pub async fn submit_human_conversation_entry_with_skill(
        &self,
        text: impl Into<String>,
        skill_id: &str,
    ) {
        let text = text.into();
        if text.trim().is_empty() {
            tracing::debug!("submission ignored: empty input");
            return;
        }
        let skill = {
            let inner = self.inner.lock();
            inner.skills.iter().find(|skill| skill.id == skill_id).cloned()
        };
        let Some(skill) = skill else {
            tracing::debug!(skill_id, "submission ignored: unknown skill");
            return;
        };
        self.push_human_turn_and_generate(text, ActionType::Query, Vec::new(), Some(skill))
            .await;
    }

    pub async fn submit_summarization_request(&self) {
        self.push_human_turn_and_generate(
            SUMMARIZE_PAGE_PROMPT.to_string(),
            ActionType::Summarize,
            Vec::new(),
            None,
        )
        .await;
    }

    /// Consume a suggestion by exact title and submit it. Uses the
    /// suggestion's `prompt` when present, else its title; preserves its
    /// action type. Unknown titles are ignored.
    pub async fn submit_suggestion(&self, title: &str) {
        let suggestion = {
            let mut inner = self.inner.lock();
            if inner.is_request_in_progress {
                tracing::debug!("suggestion ignored: request in progress");
                return;
            }
            let Some(index) = inner.suggestions.iter().position(|s| s.title == title) else {
                tracing::debug!(title, "suggestion ignored: no matching title");
                return;
            };
            inner.suggestions.remove(index)
        };
        self.notify_suggestions();
        let action_type = suggestion.action_type;
        let text = suggestion.prompt.unwrap_or(suggestion.title);
        self.push_human_turn_and_generate(text, action_type, Vec::new(), None)
            .await;
    }

    // -- regenerate / edit / retry ------------------------------------------

    /// Truncate history to the given human turn and regenerate, optionally
    /// switching the active model first.
    pub async fn regenerate_answer(&self, turn_uuid: &str, model_key: &str) {
        let model_changed = {
            let mut inner = self.inner.lock();
            if inner.is_request_in_progress {
                tracing::debug!("regenerate ignored: request in progress");
                return;
            }
            let Some(index) = inner.history.iter().position(|t| t.uuid == turn_uuid) else {
                tracing::debug!(turn_uuid, "regenerate ignored: unknown turn");
                return;
            };
            if inner.history[index].character_type != CharacterType::Human {
                tracing::debug!(turn_uuid, "regenerate ignored: not a human turn");
                return;
            }
            let model_changed = model_key != inner.model_key;
            if model_changed {
                inner.model_key = model_key.to_string();
                inner.engine = self.engine_factory.create_engine(model_key);
            }
            inner.history[index].model_key = Some(model_key.to_string());
            inner.history.truncate(index + 1);
            model_changed
        };
        if model_changed {
            self.notify_model_data();
        }
        self.notify_history_update(None);
        self.perform_assistant_generation().await;
    }

    /// Record an edit on a human turn and resubmit from it. The original
    /// turn is preserved; only its `edits` list grows, and the most recent
    /// edit wins during prompt extraction.
    pub async fn modify_conversation(&self, entry_uuid: &str, new_text: impl Into<String>) {
        let new_text = new_text.into();
        {
            let mut inner = self.inner.lock();
            if inner.is_request_in_progress {
                tracing::debug!("edit ignored: request in progress");
                return;
            }
            let Some(index) = inner.history.iter().position(|t| t.uuid == entry_uuid) else {
                tracing::debug!(entry_uuid, "edit ignored: unknown turn");
                return;
            };
            if inner.history[index].character_type != CharacterType::Human {
                tracing::debug!(entry_uuid, "edit ignored: not a human turn");
                return;
            }
            let turn = &mut inner.history[index];
            let mut edit = turn.clone();
            edit.uuid = new_uuid();
            edit.text = new_text;
            edit.edits = Vec::new();
            edit.created_time = SystemTime::now();
            turn.edits.push(edit);
            inner.history.truncate(index + 1);
        }
        self.notify_history_update(None);
        self.perform_assistant_generation().await;
    }

    /// Retry the last failed generation with the unmodified history.
    pub async fn retry_api_request(&self) {
        {
            let inner = self.inner.lock();
            if inner.is_request_in_progress {
                tracing::debug!("retry ignored: request in progress");
                return;
            }
            if inner.current_error.is_none() {
                tracing::debug!("retry ignored: no current error");
                return;
            }
        }
        self.perform_assistant_generation().await;
    }

    // -- stopping -----------------------------------------------------------

    /// Cancel any in-flight generation. If the newest turn is an unanswered
    /// human turn it is popped and returned so the UI can restore it into an
    /// editable input.
    pub fn stop_generation_and_maybe_get_human_entry(&self) -> Option<ConversationTurn> {
        let (engine, popped, was_in_progress, task_changed) = {
            let mut inner = self.inner.lock();
            inner.request_generation += 1;
            let was_in_progress = inner.is_request_in_progress;
            inner.is_request_in_progress = false;
            let task_changed = inner.task_state != TaskState::None;
            inner.task_state = TaskState::None;
            inner.is_tool_use_in_progress = false;
            let popped = if inner
                .history
                .last()
                .is_some_and(|turn| turn.character_type == CharacterType::Human)
            {
                inner.history.pop()
            } else {
                None
            };
            (Arc::clone(&inner.engine), popped, was_in_progress, task_changed)
        };
        engine.clear_all_queries();
        if was_in_progress {
            self.notify_request_in_progress(false);
        }
        if task_changed {
            self.notify_task_state(TaskState::None);
        }
        if popped.is_some() {
            self.notify_history_update(None);
        }
        popped
    }

    /// Clear the current error and take back the failed human turn so it can
    /// be resubmitted. Calling this without a trailing human turn is a
    /// caller-contract violation.
    pub fn clear_error_and_get_failed_message(&self) -> Result<ConversationTurn, StateError> {
        let turn = {
            let mut inner = self.inner.lock();
            if !inner
                .history
                .last()
                .is_some_and(|turn| turn.character_type == CharacterType::Human)
            {
                return Err(StateError::NoHumanTurn);
            }
            inner.current_error = None;
            inner.history.pop().ok_or(StateError::NoHumanTurn)?
        };
        self.notify_history_update(None);
        Ok(turn)
    }

    // -- tool-use task ------------------------------------------------------

    pub fn pause_task(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            if inner.task_state == TaskState::Running {
                inner.task_state = TaskState::Paused;
                true
            } else {
                tracing::debug!(state = ?inner.task_state, "pause ignored");
                false
            }
        };
        if changed {
            self.notify_task_state(TaskState::Paused);
        }
    }

    /// Resume a paused task and attempt to drive the tool loop forward.
    pub async fn resume_task(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            if inner.task_state == TaskState::Paused {
                inner.task_state = TaskState::Running;
                true
            } else {
                tracing::debug!(state = ?inner.task_state, "resume ignored");
                false
            }
        };
        if changed {
            self.notify_task_state(TaskState::Running);
            self.maybe_advance_tool_loop().await;
        }
    }

    /// Stop the task outright, aborting the current generation.
    pub fn stop_task(&self) {
        let (engine, was_in_progress) = {
            let mut inner = self.inner.lock();
            if !matches!(inner.task_state, TaskState::Running | TaskState::Paused) {
                tracing::debug!(state = ?inner.task_state, "stop ignored");
                return;
            }
            inner.task_state = TaskState::Stopped;
            inner.is_tool_use_in_progress = false;
            inner.request_generation += 1;
            let was_in_progress = inner.is_request_in_progress;
            inner.is_request_in_progress = false;
            (Arc::clone(&inner.engine), was_in_progress)
        };
        engine.clear_all_queries();
        self.notify_task_state(TaskState::Stopped);
        if was_in_progress {
            self.notify_request_in_progress(false);
        }
    }

    /// Resolve a pending tool-use request with its output and attempt to
    /// advance the tool loop. Unknown or already-resolved ids are ignored.
    pub async fn respond_to_tool_use_request(&self, tool_id: &str, output: Vec<ContentBlock>) {
        let updated = {
            let mut inner = self.inner.lock();
            let Some(turn) = inner
                .history
                .last_mut()
                .filter(|turn| turn.character_type == CharacterType::Assistant)
            else {
                tracing::debug!(tool_id, "tool response ignored: no assistant turn");
                return;
            };
            let Some(tool_use) = turn.events.iter_mut().find_map(|event| match event {
                ConversationEntryEvent::ToolUse(tool_use)
                    if tool_use.id == tool_id && tool_use.output.is_none() =>
                {
                    Some(tool_use)
                }
                _ => None,
            }) else {
                tracing::debug!(tool_id, "tool response ignored: no pending request");
                return;
            };
            tool_use.output = Some(output);
            tool_use.permission_challenge = false;
            turn.clone()
        };
        self.notify_history_update(Some(&updated));
        self.maybe_advance_tool_loop().await;
    }

    /// Answer a permission challenge on a pending tool-use request. Denial
    /// writes a fixed denial output; approval clears the challenge and
    /// leaves the request awaiting its real output.
    pub async fn process_permission_challenge(&self, tool_id: &str, approved: bool) {
        let updated = {
            let mut inner = self.inner.lock();
            let Some(turn) = inner
                .history
                .last_mut()
                .filter(|turn| turn.character_type == CharacterType::Assistant)
            else {
                tracing::debug!(tool_id, "permission response ignored: no assistant turn");
                return;
            };
            let Some(tool_use) = turn.events.iter_mut().find_map(|event| match event {
                ConversationEntryEvent::ToolUse(tool_use)
                    if tool_use.id == tool_id
                        && tool_use.permission_challenge
                        && tool_use.output.is_none() =>
                {
                    Some(tool_use)
                }
                _ => None,
            }) else {
                tracing::debug!(tool_id, "permission response ignored: no pending challenge");
                return;
            };
            tool_use.permission_challenge = false;
            if !approved {
                tool_use.output = Some(vec![ContentBlock::Text {
                    text: PERMISSION_DENIED_OUTPUT.to_string(),
                }]);
            }
            turn.clone()
        };
        self.notify_history_update(Some(&updated));
        self.maybe_advance_tool_loop().await;
    }

    // -- ratings ------------------------------------------------------------

    /// Record feedback on an assistant turn. Unknown turns are ignored.
    pub fn rate_message(&self, turn_uuid: &str, liked: bool) {
        let mut inner = self.inner.lock();
        let known = inner
            .history
            .iter()
            .any(|turn| turn.uuid == turn_uuid && turn.character_type == CharacterType::Assistant);
        if !known {
            tracing::debug!(turn_uuid, "rating ignored: unknown assistant turn");
            return;
        }
        inner.ratings.insert(turn_uuid.to_string(), liked);
    }

    // -- suggestions --------------------------------------------------------

    /// Ask the engine for follow-up question suggestions over the attached
    /// page content. Ignored while suggestions are generating or already
    /// generated.
    pub async fn generate_questions(&self) {
        let (engine, contents, language) = {
            let mut inner = self.inner.lock();
            if matches!(
                inner.suggestion_status,
                SuggestionGenerationStatus::IsGenerating | SuggestionGenerationStatus::HasGenerated
            ) {
                tracing::debug!(status = ?inner.suggestion_status, "question generation ignored");
                return;
            }
            inner.suggestion_status = SuggestionGenerationStatus::IsGenerating;
            let contents: Vec<PageContent> = inner
                .history
                .iter()
                .filter_map(|turn| inner.page_contents.get(&turn.uuid))
                .flatten()
                .cloned()
                .collect();
            (
                Arc::clone(&inner.engine),
                contents,
                inner.selected_language.clone(),
            )
        };
        self.notify_suggestions();

        let result = engine.generate_question_suggestions(contents, &language).await;
        {
            let mut inner = self.inner.lock();
            match result {
                Ok(titles) => {
                    inner
                        .suggestions
                        .extend(titles.into_iter().map(Suggestion::from_title));
                    inner.suggestion_status = SuggestionGenerationStatus::HasGenerated;
                }
                Err(error) => {
                    tracing::debug!(%error, "question generation failed");
                    inner.suggestion_status = SuggestionGenerationStatus::CanGenerate;
                }
            }
        }
        self.notify_suggestions();
    }

    // -- generation ---------------------------------------------------------

    async fn push_human_turn_and_generate(
        &self,
        text: String,
        action_type: ActionType,
        files: Vec<UploadedFile>,
        skill: Option<Skill>,
    ) {
        let turn = {
            let mut inner = self.inner.lock();
            if inner.is_request_in_progress {
                tracing::debug!("submission ignored: request in progress");
                return;
            }
            let turn = ConversationTurn {
                uuid: new_uuid(),
                character_type: CharacterType::Human,
                action_type,
                text,
                selected_text: None,
                events: Vec::new(),
                edits: Vec::new(),
                uploaded_files: files,
                skill,
                model_key: None,
                created_time: SystemTime::now(),
            };
            inner.history.push(turn.clone());
            turn
        };
        self.notify_history_update(Some(&turn));
        self.perform_assistant_generation().await;
    }

    /// Run one generation attempt end to end: build the request from the
    /// current state, stream engine events into the current assistant turn,
    /// and settle the final outcome.
    async fn perform_assistant_generation(&self) {
        let (engine, request, generation) = {
            let mut inner = self.inner.lock();
            inner.request_generation += 1;
            let generation = inner.request_generation;
            inner.is_request_in_progress = true;
            inner.current_error = None;
            if inner.task_state == TaskState::Stopped {
                inner.task_state = TaskState::None;
            }
            let request = GenerationRequest {
                history: inner.history.clone(),
                page_contents: inner.page_contents.clone(),
                selected_language: inner.selected_language.clone(),
                is_temporary: self.is_temporary,
                tools: inner.tools.clone(),
                preferred_tool_name: inner.preferred_tool_name.clone(),
                capability: request_capability(&inner.history),
            };
            (Arc::clone(&inner.engine), request, generation)
        };
        self.notify_request_in_progress(true);

        let mut stream = engine.generate_assistant_response(request).events();
        let mut failure = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => match self.apply_engine_event(generation, event) {
                    Applied::Stale => return,
                    Applied::Updated { turn, task_entered } => {
                        if task_entered {
                            self.notify_task_state(TaskState::Running);
                        }
                        self.notify_history_update(Some(&turn));
                    }
                    Applied::Metadata => {}
                },
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }
        self.finish_generation(generation, failure);
    }

    fn apply_engine_event(&self, generation: u64, event: ConversationEntryEvent) -> Applied {
        let mut inner = self.inner.lock();
        if inner.request_generation != generation {
            tracing::warn!("ignoring event from a superseded generation");
            return Applied::Stale;
        }

        // Metadata events update the conversation, not the turn.
        let event = match event {
            ConversationEntryEvent::TitleUpdate { title } => {
                inner.title = title;
                return Applied::Metadata;
            }
            ConversationEntryEvent::SelectedLanguage { language } => {
                inner.selected_language = language;
                return Applied::Metadata;
            }
            ConversationEntryEvent::ContentReceipt {
                total_tokens,
                trimmed_tokens,
            } => {
                inner.token_usage = TokenUsage {
                    total_tokens,
                    trimmed_tokens,
                };
                return Applied::Metadata;
            }
            event => event,
        };

        let delta = inner.engine.supports_delta_text_responses();
        if !inner
            .history
            .last()
            .is_some_and(|turn| turn.character_type == CharacterType::Assistant)
        {
            let model_key = inner.model_key.clone();
            inner.history.push(ConversationTurn {
                uuid: new_uuid(),
                character_type: CharacterType::Assistant,
                action_type: ActionType::Response,
                text: String::new(),
                selected_text: None,
                events: Vec::new(),
                edits: Vec::new(),
                uploaded_files: Vec::new(),
                skill: None,
                model_key: Some(model_key),
                created_time: SystemTime::now(),
            });
        }

        let mut entered_tool_task = false;
        let Some(turn) = inner.history.last_mut() else {
            return Applied::Metadata;
        };
        match event {
            ConversationEntryEvent::Completion { text } => {
                // Keep exactly one current completion event at the tail of
                // the streaming run: merge with (delta) or replace
                // (non-delta) the previous completion, then re-append.
                let merged = match turn.events.last() {
                    Some(ConversationEntryEvent::Completion { text: previous }) if delta => {
                        let mut merged = previous.clone();
                        merged.push_str(&text);
                        merged
                    }
                    _ => text,
                };
                if matches!(turn.events.last(), Some(ConversationEntryEvent::Completion { .. })) {
                    turn.events.pop();
                }
                turn.events
                    .push(ConversationEntryEvent::Completion { text: merged });
                let text = completion_text(turn, delta);
                turn.text = text;
            }
            ConversationEntryEvent::ToolUse(tool_use) => {
                turn.events.push(ConversationEntryEvent::ToolUse(tool_use));
                entered_tool_task = true;
            }
            other => turn.events.push(other),
        }
        let snapshot = turn.clone();

        let mut task_entered = false;
        if entered_tool_task {
            inner.is_tool_use_in_progress = true;
            if inner.task_state == TaskState::None {
                inner.task_state = TaskState::Running;
                task_entered = true;
            }
        }

        Applied::Updated {
            turn: snapshot,
            task_entered,
        }
    }

    fn finish_generation(&self, generation: u64, failure: Option<ApiError>) {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.request_generation != generation {
                tracing::warn!("ignoring completion of a superseded generation");
                Outcome::Stale
            } else {
                inner.is_request_in_progress = false;
                if let Some(error) = failure {
                    inner.current_error = Some(error);
                    let task_changed = inner.task_state != TaskState::None;
                    inner.task_state = TaskState::None;
                    inner.is_tool_use_in_progress = false;
                    Outcome::Failed(error, task_changed)
                } else if inner
                    .history
                    .last()
                    .filter(|turn| turn.character_type == CharacterType::Assistant)
                    .is_some_and(|turn| turn.pending_tool_uses().next().is_some())
                {
                    // Generation is suspended awaiting tool responses; the
                    // task stays running and no suggestions are seeded.
                    Outcome::SuspendedPendingTools
                } else {
                    let task_changed = inner.task_state != TaskState::None;
                    inner.task_state = TaskState::None;
                    inner.is_tool_use_in_progress = false;
                    let suggestions_changed = match inner.suggestion_status {
                        SuggestionGenerationStatus::HasGenerated => {
                            // One-shot discard once a new assistant response
                            // has completed.
                            inner.suggestions.clear();
                            inner.suggestion_status = SuggestionGenerationStatus::CanGenerate;
                            true
                        }
                        SuggestionGenerationStatus::None => {
                            inner.suggestion_status = SuggestionGenerationStatus::CanGenerate;
                            true
                        }
                        _ => false,
                    };
                    Outcome::Complete {
                        task_changed,
                        suggestions_changed,
                    }
                }
            }
        };

        match outcome {
            Outcome::Stale => {}
            Outcome::Failed(error, task_changed) => {
                self.notify_request_in_progress(false);
                self.notify_api_error(error);
                if task_changed {
                    self.notify_task_state(TaskState::None);
                }
            }
            Outcome::SuspendedPendingTools => {
                self.notify_request_in_progress(false);
            }
            Outcome::Complete {
                task_changed,
                suggestions_changed,
            } => {
                self.notify_request_in_progress(false);
                if task_changed {
                    self.notify_task_state(TaskState::None);
                }
                if suggestions_changed {
                    self.notify_suggestions();
                }
            }
        }
    }

    /// Advance the tool loop if every tool request on the current assistant
    /// turn is resolved. Always re-derives pending state from the event
    /// list, so repeated or out-of-order calls degrade to no-ops.
    async fn maybe_advance_tool_loop(&self) {
        let proceed = {
            let mut inner = self.inner.lock();
            if inner.task_state != TaskState::Running {
                return;
            }
            let Some(turn) = inner
                .history
                .last()
                .filter(|turn| turn.character_type == CharacterType::Assistant)
            else {
                return;
            };
            if turn.resolved_tool_uses().next().is_none()
                || turn.pending_tool_uses().next().is_some()
            {
                return;
            }
            inner.task_state = TaskState::None;
            inner.is_tool_use_in_progress = false;
            true
        };
        if proceed {
            self.notify_task_state(TaskState::None);
            self.perform_assistant_generation().await;
        }
    }

    // -- notification -------------------------------------------------------

    fn observer_snapshot(
        &self,
    ) -> (
        Vec<Arc<dyn ConversationObserver>>,
        Vec<Arc<dyn ConversationEntriesObserver>>,
    ) {
        let inner = self.inner.lock();
        (
            inner.observers.values().cloned().collect(),
            inner.entries_observers.values().cloned().collect(),
        )
    }

    fn notify_history_update(&self, turn: Option<&ConversationTurn>) {
        let (observers, entries_observers) = self.observer_snapshot();
        for observer in observers {
            observer.on_history_update(turn);
        }
        for observer in entries_observers {
            observer.on_history_update(turn);
        }
    }

    fn notify_request_in_progress(&self, in_progress: bool) {
        let (observers, entries_observers) = self.observer_snapshot();
        for observer in observers {
            observer.on_request_in_progress(in_progress);
        }
        for observer in entries_observers {
            observer.on_request_in_progress(in_progress);
        }
    }

    fn notify_task_state(&self, state: TaskState) {
        let (observers, entries_observers) = self.observer_snapshot();
        for observer in observers {
            observer.on_task_state_changed(state);
        }
        for observer in entries_observers {
            observer.on_task_state_changed(state);
        }
    }

    fn notify_api_error(&self, error: ApiError) {
        let (observers, _) = self.observer_snapshot();
        for observer in observers {
            observer.on_api_error(error);
        }
    }

    fn notify_suggestions(&self) {
        let (suggestions, status) = {
            let inner = self.inner.lock();
            (inner.suggestions.clone(), inner.suggestion_status)
        };
        let (observers, _) = self.observer_snapshot();
        for observer in observers {
            observer.on_suggestions_changed(&suggestions, status);
        }
    }

    fn notify_model_data(&self) {
        let current_key = self.model_key();
        let default_key = self.model_store.default_key();
        let models: Vec<Model> = self.model_store.models();
        let (observers, _) = self.observer_snapshot();
        for observer in observers {
            observer.on_model_data_changed(&current_key, &default_key, &models);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Vision is requested when the newest human turn carries image uploads.
fn request_capability(history: &[ConversationTurn]) -> RequestCapability {
    let has_images = history
        .iter()
        .rev()
        .find(|turn| turn.character_type == CharacterType::Human)
        .is_some_and(|turn| {
            turn.uploaded_files.iter().any(|file| {
                matches!(
                    file.kind,
                    UploadedFileKind::Image | UploadedFileKind::Screenshot
                )
            })
        });
    if has_images {
        RequestCapability::Vision
    } else {
        RequestCapability::Chat
    }
}

/// The turn text derived from its completion events: the in-order
/// concatenation for delta engines, or the most recent completion alone for
/// replacement engines (an earlier completion separated by an interrupting
/// event is already subsumed by the latest one).
fn completion_text(turn: &ConversationTurn, delta: bool) -> String {
    let completions = turn.events.iter().filter_map(|event| match event {
        ConversationEntryEvent::Completion { text } => Some(text.as_str()),
        _ => None,
    });
    if delta {
        completions.collect()
    } else {
        completions.last().unwrap_or_default().to_string()
    }
}
