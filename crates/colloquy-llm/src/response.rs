use std::pin::Pin;

use futures::Stream;
use tokio_stream::StreamExt;

use crate::error::ApiError;
use crate::turn::ConversationEntryEvent;

/// A live streaming response from an engine.
///
/// Wraps a finite sequence of parsed entry events. Consume it event-by-event
/// via [`events()`](EngineResponse::events); dropping the stream cancels the
/// underlying request.
pub struct EngineResponse {
    inner: Pin<Box<dyn Stream<Item = Result<ConversationEntryEvent, ApiError>> + Send>>,
}

impl EngineResponse {
    pub fn new(
        stream: impl Stream<Item = Result<ConversationEntryEvent, ApiError>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A response that fails immediately with a single terminal error.
    pub fn failed(error: ApiError) -> Self {
        Self::new(tokio_stream::once(Err(error)))
    }

    /// Consume the response as an async stream of events.
    pub fn events(
        self,
    ) -> Pin<Box<dyn Stream<Item = Result<ConversationEntryEvent, ApiError>> + Send>> {
        self.inner
    }

    /// Collect the full streamed response into a flat event list.
    pub async fn into_events(self) -> Result<Vec<ConversationEntryEvent>, ApiError> {
        let mut events = Vec::new();
        let mut stream = self.inner;
        while let Some(event) = stream.next().await {
            events.push(event?);
        }
        Ok(events)
    }
}
