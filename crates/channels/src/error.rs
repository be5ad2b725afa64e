use std::error::Error as StdError;

use volley_common::SenderId;

/// Crate-wide result type for channel session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel session errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The sender row does not exist.
    #[error("sender not found: {sender_id}")]
    SenderNotFound { sender_id: SenderId },

    /// No session has been initialized for this sender.
    #[error("channel session not initialized for sender {sender_id}")]
    NotInitialized { sender_id: SenderId },

    /// A session exists but has not reported ready.
    #[error("channel session not connected for sender {sender_id}")]
    NotConnected { sender_id: SenderId },

    /// The destination identifier cannot be normalized to an address.
    #[error("invalid destination: {destination:?}")]
    InvalidDestination { destination: String },

    /// Wrapped failure from the channel adapter.
    #[error("channel adapter error: {context}: {source}")]
    Adapter {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn adapter(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Adapter {
            context: context.into(),
            source: source.into(),
        }
    }
}
