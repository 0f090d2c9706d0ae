//! Converts accumulated conversation state into the outbound wire event
//! list, applying the context-budget and tool-result-pruning policies.

use std::collections::{HashMap, HashSet};

use colloquy_llm::{
    CharacterType, ContentBlock, ConversationEntryEvent, GenerationRequest, PageContent,
    PageContentKind, ToolUseEvent,
};

use crate::types::{
    WireContent, WireContentBlock, WireEvent, WireEventKind, WireFunction, WireImageUrl,
    WireMemory, WireRole, WireToolCall, WireToolCallKind,
};

/// Substituted for a pruned tool result's content in the wire request.
pub const LARGE_TOOL_RESULT_PLACEHOLDER: &str =
    "[Large result removed to save space for subsequent results]";

/// Policy knobs for one build.
pub(crate) struct BuildOptions {
    pub max_associated_content_length: usize,
    /// Text content above this many characters counts as "large".
    pub large_tool_use_event_size_threshold: usize,
    /// How many large tool results to keep, counting from the newest.
    pub max_count_large_tool_use_events: usize,
    /// `None` skips the user-memory context event entirely.
    pub memory: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Full conversation build
// ---------------------------------------------------------------------------

/// Build the ordered wire event list for an assistant-response request.
///
/// Pass 1 walks the history newest-to-oldest, greedily consuming the
/// associated-content budget (an item that would overflow is kept once,
/// truncated to the remainder) and marking large tool results beyond the
/// keep-count for removal. Pass 2 rebuilds the final sequence in forward
/// order. The scan is recomputed from scratch on every call; history can be
/// edited or truncated between requests.
pub(crate) fn build_conversation_events(
    request: &GenerationRequest,
    options: &BuildOptions,
) -> Vec<WireEvent> {
    let mut remaining = options.max_associated_content_length;
    // Kept character count per page-content uuid. Absent = excluded.
    let mut kept_lengths: HashMap<&str, usize> = HashMap::new();
    let mut large_seen = 0usize;
    let mut pruned_tool_ids: HashSet<&str> = HashSet::new();

    for turn in request.history.iter().rev() {
        if let Some(contents) = request.page_contents.get(&turn.uuid) {
            for page_content in contents.iter().rev() {
                if remaining == 0 {
                    continue;
                }
                let length = page_content.content.chars().count();
                if length > remaining {
                    kept_lengths.insert(&page_content.uuid, remaining);
                    remaining = 0;
                } else {
                    kept_lengths.insert(&page_content.uuid, length);
                    remaining -= length;
                }
            }
        }

        if turn.character_type == CharacterType::Assistant {
            for event in turn.events.iter().rev() {
                let ConversationEntryEvent::ToolUse(tool_use) = event else {
                    continue;
                };
                let Some(output) = &tool_use.output else {
                    continue;
                };
                if is_large_output(output, options.large_tool_use_event_size_threshold) {
                    large_seen += 1;
                    if large_seen > options.max_count_large_tool_use_events {
                        pruned_tool_ids.insert(&tool_use.id);
                    }
                }
            }
        }
    }

    let mut events = Vec::new();

    if let Some(memories) = &options.memory {
        events.push(WireEvent {
            role: WireRole::User,
            kind: WireEventKind::UserMemory,
            content: WireContent::Text(String::new()),
            memory: Some(WireMemory {
                memories: memories.clone(),
            }),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });
    }

    for turn in &request.history {
        if let Some(contents) = request.page_contents.get(&turn.uuid) {
            for page_content in contents {
                let Some(&kept) = kept_lengths.get(page_content.uuid.as_str()) else {
                    continue;
                };
                events.push(page_content_event(page_content, kept));
            }
        }

        push_uploaded_file_events(&mut events, turn);

        if let Some(selected_text) = &turn.selected_text {
            events.push(WireEvent::simple(
                WireRole::User,
                WireEventKind::PageExcerpt,
                WireContent::Text(selected_text.clone()),
            ));
        }

        if turn.character_type == CharacterType::Human
            && let Some(skill) = &turn.skill
        {
            events.push(WireEvent::simple(
                WireRole::User,
                WireEventKind::SkillDefinition,
                WireContent::Text(skill.definition.clone()),
            ));
        }

        let resolved: Vec<&ToolUseEvent> = turn.resolved_tool_uses().collect();
        events.push(primary_event(turn, &resolved));

        for tool_use in resolved {
            events.push(tool_result_event(
                tool_use,
                pruned_tool_ids.contains(tool_use.id.as_str()),
            ));
        }
    }

    events
}

// ---------------------------------------------------------------------------
// Page-content-only build (question suggestions)
// ---------------------------------------------------------------------------

/// Budget page contents reverse-chronologically (same greedy truncation as
/// the full build, no tool pruning) and emit them in forward order.
pub(crate) fn build_page_content_events(
    page_contents: &[PageContent],
    budget: usize,
) -> Vec<WireEvent> {
    let mut remaining = budget;
    let mut kept_lengths: HashMap<&str, usize> = HashMap::new();

    for page_content in page_contents.iter().rev() {
        if remaining == 0 {
            continue;
        }
        let length = page_content.content.chars().count();
        if length > remaining {
            kept_lengths.insert(&page_content.uuid, remaining);
            remaining = 0;
        } else {
            kept_lengths.insert(&page_content.uuid, length);
            remaining -= length;
        }
    }

    page_contents
        .iter()
        .filter_map(|page_content| {
            kept_lengths
                .get(page_content.uuid.as_str())
                .map(|&kept| page_content_event(page_content, kept))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_large_output(output: &[ContentBlock], threshold: usize) -> bool {
    let mut text_length = 0usize;
    for block in output {
        match block {
            ContentBlock::Image { .. } => return true,
            ContentBlock::Text { text } => text_length += text.chars().count(),
        }
    }
    text_length > threshold
}

fn page_content_event(page_content: &PageContent, kept: usize) -> WireEvent {
    let content = if kept >= page_content.content.chars().count() {
        page_content.content.clone()
    } else {
        page_content.content.chars().take(kept).collect()
    };
    let kind = match page_content.kind {
        PageContentKind::Text => WireEventKind::PageText,
        PageContentKind::VideoTranscript => WireEventKind::VideoTranscript,
    };
    WireEvent::simple(WireRole::User, kind, WireContent::Text(content))
}

fn push_uploaded_file_events(events: &mut Vec<WireEvent>, turn: &colloquy_llm::ConversationTurn) {
    use colloquy_llm::UploadedFileKind;

    for (file_kind, event_kind) in [
        (UploadedFileKind::Image, WireEventKind::UploadImage),
        (UploadedFileKind::Screenshot, WireEventKind::UploadScreenshot),
        (UploadedFileKind::Pdf, WireEventKind::UploadPdf),
    ] {
        let data: Vec<String> = turn
            .uploaded_files
            .iter()
            .filter(|file| file.kind == file_kind)
            .map(|file| file.data.clone())
            .collect();
        if !data.is_empty() {
            events.push(WireEvent::simple(
                WireRole::User,
                event_kind,
                WireContent::List(data),
            ));
        }
    }
}

/// The primary chat/summarize event for a turn. Assistant turns with
/// resolved tool calls replay them on a `toolCalls` event instead.
fn primary_event(turn: &colloquy_llm::ConversationTurn, resolved: &[&ToolUseEvent]) -> WireEvent {
    if turn.character_type == CharacterType::Assistant && !resolved.is_empty() {
        return WireEvent {
            role: WireRole::Assistant,
            kind: WireEventKind::ToolCalls,
            content: WireContent::Text(turn.latest_text().to_string()),
            memory: None,
            tool_calls: resolved
                .iter()
                .map(|tool_use| WireToolCall {
                    id: tool_use.id.clone(),
                    kind: WireToolCallKind::Function,
                    function: WireFunction {
                        name: tool_use.tool_name.clone(),
                        arguments: tool_use.arguments_json.clone(),
                    },
                })
                .collect(),
            tool_call_id: None,
        };
    }

    let role = match turn.character_type {
        CharacterType::Human => WireRole::User,
        CharacterType::Assistant => WireRole::Assistant,
    };
    let kind = if turn.action_type == colloquy_llm::ActionType::Summarize {
        WireEventKind::RequestSummary
    } else {
        WireEventKind::ChatMessage
    };
    WireEvent::simple(role, kind, WireContent::Text(turn.latest_text().to_string()))
}

fn tool_result_event(tool_use: &ToolUseEvent, pruned: bool) -> WireEvent {
    let blocks = if pruned {
        vec![WireContentBlock::Text {
            text: LARGE_TOOL_RESULT_PLACEHOLDER.to_string(),
        }]
    } else {
        tool_use
            .output
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => WireContentBlock::Text { text: text.clone() },
                ContentBlock::Image { url } => WireContentBlock::ImageUrl {
                    image_url: WireImageUrl { url: url.clone() },
                },
            })
            .collect()
    };
    WireEvent {
        role: WireRole::Tool,
        kind: WireEventKind::ToolUse,
        content: WireContent::Blocks(blocks),
        memory: None,
        tool_calls: Vec::new(),
        tool_call_id: Some(tool_use.id.clone()),
    }
}
