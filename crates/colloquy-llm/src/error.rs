use serde::{Deserialize, Serialize};

/// Terminal errors a generation backend can report.
///
/// These are opaque pass-through codes as far as the conversation core is
/// concerned: the handler stores the most recent one and forwards it to
/// observers without interpreting it. "No error" is represented by
/// `Option::<ApiError>::None` on the handler, not by a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ApiError {
    #[error("internal backend error")]
    Internal,

    #[error("rate limit reached")]
    RateLimitReached,

    #[error("context limit reached")]
    ContextLimitReached,

    #[error("network issue")]
    NetworkIssue,

    #[error("connection failed")]
    ConnectionIssue,

    #[error("invalid credentials")]
    InvalidCredentials,
}
