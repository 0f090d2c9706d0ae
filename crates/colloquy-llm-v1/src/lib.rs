//! The production conversation engine: translates conversation state into
//! wire requests for the v1 conversation API and demultiplexes streamed
//! responses back into entry events.

mod client;
mod convert;
mod stream;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use colloquy_llm::{
    ApiError, EngineConsumer, EngineResponse, GenerationRequest, PageContent, ToolDefinition,
};
use colloquy_store::{MemoryStore, ModelStore};

pub use client::ApiConfig;
pub use convert::LARGE_TOOL_RESULT_PLACEHOLDER;

use crate::client::ClientState;
use crate::convert::BuildOptions;
use crate::types::{WireRequest, WireTool, WireToolCallKind, WireToolSpec};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Pruning policy knobs. Defaults match the deployed service.
#[derive(Debug, Clone)]
pub struct V1EngineOptions {
    /// Keep at most this many large tool results, newest first.
    pub max_count_large_tool_use_events: usize,
    /// Text output above this many characters counts as large.
    pub large_tool_use_event_size_threshold: usize,
}

impl Default for V1EngineOptions {
    fn default() -> Self {
        Self {
            max_count_large_tool_use_events: 3,
            large_tool_use_event_size_threshold: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// [`EngineConsumer`] implementation backed by the v1 conversation API.
///
/// One engine serves one selected model; switching models constructs a
/// fresh engine (discarding any in-flight query state with it).
pub struct V1Engine {
    state: Arc<ClientState>,
    model_key: String,
    model_name: String,
    model_store: Arc<ModelStore>,
    memory_store: Arc<MemoryStore>,
    options: V1EngineOptions,
}

impl V1Engine {
    pub fn new(
        config: ApiConfig,
        model_key: impl Into<String>,
        model_store: Arc<ModelStore>,
        memory_store: Arc<MemoryStore>,
    ) -> Self {
        Self::with_options(
            config,
            model_key,
            model_store,
            memory_store,
            V1EngineOptions::default(),
        )
    }

    pub fn with_options(
        config: ApiConfig,
        model_key: impl Into<String>,
        model_store: Arc<ModelStore>,
        memory_store: Arc<MemoryStore>,
        options: V1EngineOptions,
    ) -> Self {
        let model_key = model_key.into();
        let model_name = model_store
            .name_from_key(&model_key)
            .unwrap_or_else(|| model_key.clone());
        Self {
            state: Arc::new(ClientState::new(config)),
            model_key,
            model_name,
            model_store,
            memory_store,
            options,
        }
    }

    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    /// The backend model name for this request: the newest turn's explicit
    /// override if it resolves, else the engine's configured model.
    fn request_model_name(&self, request: &GenerationRequest) -> String {
        request
            .history
            .last()
            .and_then(|turn| turn.model_key.as_deref())
            .and_then(|key| self.model_store.name_from_key(key))
            .unwrap_or_else(|| self.model_name.clone())
    }
}

#[async_trait]
impl EngineConsumer for V1Engine {
    fn generate_assistant_response(&self, request: GenerationRequest) -> EngineResponse {
        if !can_perform_generation(&request.history) {
            tracing::debug!("refusing generation: history does not end at a completable turn");
            return EngineResponse::failed(ApiError::Internal);
        }

        let memory = if request.is_temporary {
            None
        } else {
            self.memory_store.memory_for_engine()
        };
        let build = BuildOptions {
            max_associated_content_length: self
                .model_store
                .max_associated_content_length(Some(&self.model_key)),
            large_tool_use_event_size_threshold: self.options.large_tool_use_event_size_threshold,
            max_count_large_tool_use_events: self.options.max_count_large_tool_use_events,
            memory,
        };
        let events = convert::build_conversation_events(&request, &build);

        let body = WireRequest {
            model: self.request_model_name(&request),
            events,
            language: request.selected_language.clone(),
            stream: true,
            capability: request.capability,
            tools: request.tools.iter().map(wire_tool).collect(),
            preferred_tool_name: request.preferred_tool_name.clone(),
        };

        EngineResponse::new(stream::open(Arc::clone(&self.state), body))
    }

    async fn generate_question_suggestions(
        &self,
        page_contents: Vec<PageContent>,
        selected_language: &str,
    ) -> Result<Vec<String>, ApiError> {
        let budget = self
            .model_store
            .max_associated_content_length(Some(&self.model_key));
        let mut events = convert::build_page_content_events(&page_contents, budget);
        events.push(types::WireEvent::simple(
            types::WireRole::User,
            types::WireEventKind::RequestSuggestedActions,
            types::WireContent::Text(String::new()),
        ));

        let body = WireRequest {
            model: self.model_name.clone(),
            events,
            language: selected_language.to_string(),
            stream: false,
            capability: Default::default(),
            tools: Vec::new(),
            preferred_tool_name: None,
        };

        let response = self.state.perform(&body).await?;
        parse_suggestions(response.completion.as_deref().unwrap_or_default())
    }

    fn clear_all_queries(&self) {
        self.state.bump_epoch();
    }

    fn supports_delta_text_responses(&self) -> bool {
        true
    }
}

/// A generation is performable off the back of a human turn, or off an
/// assistant turn whose tool calls are all resolved (the tool-loop
/// continuation case).
fn can_perform_generation(history: &[colloquy_llm::ConversationTurn]) -> bool {
    match history.last() {
        None => false,
        Some(turn) if turn.character_type == colloquy_llm::CharacterType::Human => true,
        Some(turn) => {
            turn.resolved_tool_uses().next().is_some() && turn.pending_tool_uses().next().is_none()
        }
    }
}

fn wire_tool(tool: &ToolDefinition) -> WireTool {
    WireTool {
        kind: WireToolCallKind::Function,
        function: WireToolSpec {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

/// Parse a `|`-separated suggestion completion. A completion with no usable
/// segments is an internal error, never an empty list.
fn parse_suggestions(completion: &str) -> Result<Vec<String>, ApiError> {
    let suggestions: Vec<String> = completion
        .split('|')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    if suggestions.is_empty() {
        return Err(ApiError::Internal);
    }
    Ok(suggestions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    use colloquy_llm::{ActionType, CharacterType, ConversationTurn};
    use colloquy_store::{Model, ModelAccess, ModelCategory, ModelOptions};

    fn stores() -> (Arc<ModelStore>, Arc<MemoryStore>) {
        let store = ModelStore::new(
            vec![
                Model {
                    key: "swift".into(),
                    name: "swift-wire".into(),
                    display_maker: "test".into(),
                    category: ModelCategory::Chat,
                    access: ModelAccess::Basic,
                    supports_vision: false,
                    supports_tools: true,
                    options: ModelOptions::default(),
                },
                Model {
                    key: "sage".into(),
                    name: "sage-wire".into(),
                    display_maker: "test".into(),
                    category: ModelCategory::Chat,
                    access: ModelAccess::Premium,
                    supports_vision: true,
                    supports_tools: true,
                    options: ModelOptions::default(),
                },
            ],
            "swift",
        );
        (Arc::new(store), Arc::new(MemoryStore::new()))
    }

    fn engine() -> V1Engine {
        let (models, memory) = stores();
        V1Engine::new(ApiConfig::default(), "swift", models, memory)
    }

    fn turn(character: CharacterType, text: &str) -> ConversationTurn {
        ConversationTurn {
            uuid: "t".into(),
            character_type: character,
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
    fn parse_suggestions_splits_trims_and_discards_empties() {
        assert_eq!(
            parse_suggestions("question1| question2 |question3").unwrap(),
            ["question1", "question2", "question3"]
        );
        assert_eq!(parse_suggestions(" one ").unwrap(), ["one"]);
        assert_eq!(parse_suggestions(""), Err(ApiError::Internal));
        assert_eq!(parse_suggestions(" | | "), Err(ApiError::Internal));
    }

    #[tokio::test]
    async fn generation_off_a_non_human_turn_fails_without_a_request() {
        let engine = engine();
        let request = GenerationRequest {
            history: vec![turn(CharacterType::Assistant, "answer")],
            ..Default::default()
        };
        let result = engine
            .generate_assistant_response(request)
            .into_events()
            .await;
        assert_eq!(result, Err(ApiError::Internal));

        let result = engine
            .generate_assistant_response(GenerationRequest::default())
            .into_events()
            .await;
        assert_eq!(result, Err(ApiError::Internal));
    }

    #[test]
    fn resolved_tool_batch_permits_a_continuation() {
        use colloquy_llm::{ContentBlock, ConversationEntryEvent, ToolUseEvent};

        let mut assistant = turn(CharacterType::Assistant, "");
        assistant
            .events
            .push(ConversationEntryEvent::ToolUse(ToolUseEvent {
                id: "call_1".into(),
                tool_name: "weather".into(),
                arguments_json: "{}".into(),
                output: None,
                permission_challenge: false,
            }));
        let mut history = vec![turn(CharacterType::Human, "hi"), assistant];
        assert!(!can_perform_generation(&history));

        if let Some(ConversationEntryEvent::ToolUse(tool_use)) = history[1].events.last_mut() {
            tool_use.output = Some(vec![ContentBlock::Text { text: "72F".into() }]);
        }
        assert!(can_perform_generation(&history));
    }

    #[test]
    fn newest_turn_model_key_overrides_the_request_model() {
        let engine = engine();
        let mut request = GenerationRequest {
            history: vec![turn(CharacterType::Human, "hi")],
            ..Default::default()
        };
        assert_eq!(engine.request_model_name(&request), "swift-wire");

        request.history.last_mut().unwrap().model_key = Some("sage".into());
        assert_eq!(engine.request_model_name(&request), "sage-wire");

        // An unresolvable override falls back to the configured model.
        request.history.last_mut().unwrap().model_key = Some("missing".into());
        assert_eq!(engine.request_model_name(&request), "swift-wire");
    }
}
