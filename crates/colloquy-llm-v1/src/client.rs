//! HTTP plumbing shared by the streaming and non-streaming request paths.

use std::sync::atomic::{AtomicU64, Ordering};

use colloquy_llm::ApiError;

use crate::types::{WireCompletionResponse, WireRequest};

/// Configuration for the conversation API backend.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.colloquy.dev/v1".into(),
            api_key: String::new(),
        }
    }
}

/// Shared state behind an `Arc`: one reqwest client, the config, and the
/// cancellation epoch. Bumping the epoch makes every live stream opened
/// under an older epoch terminate at its next poll.
pub(crate) struct ClientState {
    pub http: reqwest::Client,
    pub config: ApiConfig,
    epoch: AtomicU64,
}

impl ClientState {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Perform a non-streaming request, returning the single JSON payload.
    pub async fn perform(&self, body: &WireRequest) -> Result<WireCompletionResponse, ApiError> {
        let url = format!("{}/conversation", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, "conversation request rejected");
            return Err(map_status(status));
        }

        response
            .json::<WireCompletionResponse>()
            .await
            .map_err(|_| ApiError::Internal)
    }
}

pub(crate) fn map_status(status: reqwest::StatusCode) -> ApiError {
    match status.as_u16() {
        401 | 403 => ApiError::InvalidCredentials,
        413 => ApiError::ContextLimitReached,
        429 => ApiError::RateLimitReached,
        _ => ApiError::Internal,
    }
}

pub(crate) fn map_transport_error(error: reqwest::Error) -> ApiError {
    if error.is_connect() {
        ApiError::ConnectionIssue
    } else {
        ApiError::NetworkIssue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_the_expected_errors() {
        use reqwest::StatusCode;
        assert_eq!(map_status(StatusCode::UNAUTHORIZED), ApiError::InvalidCredentials);
        assert_eq!(map_status(StatusCode::PAYLOAD_TOO_LARGE), ApiError::ContextLimitReached);
        assert_eq!(map_status(StatusCode::TOO_MANY_REQUESTS), ApiError::RateLimitReached);
        assert_eq!(map_status(StatusCode::INTERNAL_SERVER_ERROR), ApiError::Internal);
    }

    #[test]
    fn bumping_the_epoch_invalidates_prior_observations() {
        let state = ClientState::new(ApiConfig::default());
        let before = state.epoch();
        state.bump_epoch();
        assert_ne!(state.epoch(), before);
    }
}
