//! Bridge error types.

use thiserror::Error;

use crate::completion::TokenId;

/// Errors surfaced to the host by the bridge itself.
///
/// Engine rejections are not errors; they arrive as [`crate::Outcome`] or
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Worker side went away without producing a result.
    #[error("completion {0} abandoned before producing a result")]
    Abandoned(TokenId),

    /// Result was already taken from the token.
    #[error("completion {0} result already taken")]
    AlreadyTaken(TokenId),

    /// A global tracing subscriber was already installed.
    #[error("logging already initialized: {0}")]
    LoggingInit(String),
}

impl BridgeError {
    /// Returns true if retrying the request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Abandoned(_))
    }
}
