//! Opens an SSE connection to the conversation API and maps streamed chunks
//! to [`ConversationEntryEvent`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use colloquy_llm::{ApiError, ConversationEntryEvent, ToolUseEvent, WebSource};
use eventsource_stream::Eventsource;
use futures::Stream;
use tokio_stream::StreamExt;

use crate::client::{ClientState, map_status, map_transport_error};
use crate::types::{WireChunk, WireRequest, WireToolCallDelta};

/// Sentinel chunk terminating a stream.
const DONE_SENTINEL: &str = "[DONE]";

pub(crate) fn open(
    state: Arc<ClientState>,
    body: WireRequest,
) -> impl Stream<Item = Result<ConversationEntryEvent, ApiError>> + Send {
    async_stream::stream! {
        let epoch = state.epoch();
        let url = format!("{}/conversation", state.config.base_url);
        let response = state
            .http
            .post(&url)
            .bearer_auth(&state.config.api_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                yield Err(map_transport_error(error));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, "conversation stream rejected");
            yield Err(map_status(status));
            return;
        }

        let mut sse = response.bytes_stream().eventsource();
        let mut mapper = ChunkMapper::new();

        while let Some(event) = sse.next().await {
            if state.epoch() != epoch {
                tracing::debug!("abandoning superseded conversation stream");
                return;
            }
            match event {
                Ok(event) => {
                    if event.data == DONE_SENTINEL {
                        break;
                    }
                    match mapper.map_chunk(&event.data) {
                        Ok(events) => {
                            for parsed in events {
                                yield Ok(parsed);
                            }
                        }
                        Err(error) => {
                            yield Err(error);
                            return;
                        }
                    }
                }
                Err(error) => {
                    tracing::debug!(%error, "conversation stream transport failure");
                    yield Err(ApiError::NetworkIssue);
                    return;
                }
            }
        }

        for parsed in mapper.finish() {
            yield Ok(parsed);
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk mapper (stateful — accumulates partial tool calls by index)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Maps raw chunk JSON to entry events. Tool call fragments are
/// index-correlated and accumulated until the stream terminates; the
/// assembled calls are emitted, in index order, after the last data chunk.
pub(crate) struct ChunkMapper {
    partial_tool_calls: BTreeMap<usize, PartialToolCall>,
}

impl ChunkMapper {
    pub fn new() -> Self {
        Self {
            partial_tool_calls: BTreeMap::new(),
        }
    }

    pub fn map_chunk(&mut self, data: &str) -> Result<Vec<ConversationEntryEvent>, ApiError> {
        let chunk: WireChunk = serde_json::from_str(data).map_err(|error| {
            tracing::debug!(%error, "unparseable conversation chunk");
            ApiError::Internal
        })?;

        match chunk {
            WireChunk::Completion {
                completion,
                tool_calls,
            } => {
                let mut events = Vec::new();
                if !completion.is_empty() {
                    events.push(ConversationEntryEvent::Completion { text: completion });
                }
                for delta in tool_calls {
                    self.accumulate(delta);
                }
                Ok(events)
            }
            WireChunk::IsSearching => Ok(vec![ConversationEntryEvent::SearchStatus {
                is_searching: true,
            }]),
            WireChunk::SearchQueries { queries } => {
                Ok(vec![ConversationEntryEvent::SearchQueries { queries }])
            }
            WireChunk::WebSources { sources } => Ok(vec![ConversationEntryEvent::Sources {
                sources: sources
                    .into_iter()
                    .map(|source| WebSource {
                        title: source.title,
                        url: source.url,
                    })
                    .collect(),
            }]),
            WireChunk::SelectedLanguage { language } => {
                Ok(vec![ConversationEntryEvent::SelectedLanguage { language }])
            }
            WireChunk::ConversationTitle { title } => {
                Ok(vec![ConversationEntryEvent::TitleUpdate { title }])
            }
            WireChunk::ContentReceipt {
                total_tokens,
                trimmed_tokens,
            } => Ok(vec![ConversationEntryEvent::ContentReceipt {
                total_tokens,
                trimmed_tokens,
            }]),
            WireChunk::Unknown => Ok(Vec::new()),
        }
    }

    fn accumulate(&mut self, delta: WireToolCallDelta) {
        let partial = self.partial_tool_calls.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            partial.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                partial.name = name;
            }
            if let Some(arguments) = function.arguments {
                partial.arguments.push_str(&arguments);
            }
        }
    }

    /// Emit the fully-assembled tool calls, in index order.
    pub fn finish(self) -> Vec<ConversationEntryEvent> {
        self.partial_tool_calls
            .into_values()
            .map(|partial| {
                ConversationEntryEvent::ToolUse(ToolUseEvent {
                    id: partial.id,
                    tool_name: partial.name,
                    arguments_json: partial.arguments,
                    output: None,
                    permission_challenge: false,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_chunks_map_to_completion_events() {
        let mut mapper = ChunkMapper::new();
        let events = mapper
            .map_chunk(r#"{"type": "completion", "completion": "Hello"}"#)
            .unwrap();
        assert_eq!(
            events,
            [ConversationEntryEvent::Completion {
                text: "Hello".into()
            }]
        );

        // An empty completion yields nothing.
        let events = mapper
            .map_chunk(r#"{"type": "completion", "completion": ""}"#)
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn metadata_chunks_map_to_their_event_variants() {
        let mut mapper = ChunkMapper::new();
        assert_eq!(
            mapper.map_chunk(r#"{"type": "isSearching"}"#).unwrap(),
            [ConversationEntryEvent::SearchStatus { is_searching: true }]
        );
        assert_eq!(
            mapper
                .map_chunk(r#"{"type": "searchQueries", "queries": ["rust streams"]}"#)
                .unwrap(),
            [ConversationEntryEvent::SearchQueries {
                queries: vec!["rust streams".into()]
            }]
        );
        assert_eq!(
            mapper
                .map_chunk(r#"{"type": "conversationTitle", "title": "Streams"}"#)
                .unwrap(),
            [ConversationEntryEvent::TitleUpdate {
                title: "Streams".into()
            }]
        );
        assert_eq!(
            mapper
                .map_chunk(r#"{"type": "contentReceipt", "total_tokens": 10, "trimmed_tokens": 2}"#)
                .unwrap(),
            [ConversationEntryEvent::ContentReceipt {
                total_tokens: 10,
                trimmed_tokens: 2
            }]
        );
    }

    #[test]
    fn content_receipts_tolerate_missing_token_fields() {
        let mut mapper = ChunkMapper::new();
        assert_eq!(
            mapper.map_chunk(r#"{"type": "contentReceipt"}"#).unwrap(),
            [ConversationEntryEvent::ContentReceipt {
                total_tokens: 0,
                trimmed_tokens: 0
            }]
        );
        assert_eq!(
            mapper
                .map_chunk(r#"{"type": "contentReceipt", "total_tokens": 9}"#)
                .unwrap(),
            [ConversationEntryEvent::ContentReceipt {
                total_tokens: 9,
                trimmed_tokens: 0
            }]
        );
    }

    #[test]
    fn unknown_chunks_are_ignored() {
        let mut mapper = ChunkMapper::new();
        assert!(mapper.map_chunk(r#"{"type": "somethingNew"}"#).unwrap().is_empty());
    }

    #[test]
    fn malformed_chunks_are_internal_errors() {
        let mut mapper = ChunkMapper::new();
        assert_eq!(mapper.map_chunk("not json"), Err(ApiError::Internal));
    }

    #[test]
    fn partial_tool_calls_are_assembled_in_index_order() {
        let mut mapper = ChunkMapper::new();
        mapper
            .map_chunk(
                r#"{"type": "completion", "completion": "", "tool_calls": [
                    {"index": 1, "id": "call_b", "function": {"name": "lookup", "arguments": "{\"q\":"}}
                ]}"#,
            )
            .unwrap();
        mapper
            .map_chunk(
                r#"{"type": "completion", "completion": "", "tool_calls": [
                    {"index": 0, "id": "call_a", "function": {"name": "weather", "arguments": "{}"}},
                    {"index": 1, "function": {"arguments": "\"x\"}"}}
                ]}"#,
            )
            .unwrap();

        let events = mapper.finish();
        assert_eq!(events.len(), 2);
        let ConversationEntryEvent::ToolUse(first) = &events[0] else {
            panic!("expected tool use");
        };
        assert_eq!(first.id, "call_a");
        assert_eq!(first.tool_name, "weather");
        let ConversationEntryEvent::ToolUse(second) = &events[1] else {
            panic!("expected tool use");
        };
        assert_eq!(second.id, "call_b");
        assert_eq!(second.arguments_json, r#"{"q":"x"}"#);
        assert!(second.is_pending());
    }
}
