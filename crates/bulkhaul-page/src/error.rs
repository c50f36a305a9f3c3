//! Page channel errors.

use bulkhaul_types::StageError;

/// Errors returned by [`PageChannel`](crate::PageChannel) endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel was closed, either explicitly or because the other side
    /// failed.
    #[error("operation attempted after close")]
    Closed,
}

impl From<ChannelError> for StageError {
    fn from(err: ChannelError) -> Self {
        StageError::channel_closed(err.to_string())
    }
}
