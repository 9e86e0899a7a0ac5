//! Event channel error types.

use thiserror::Error;

/// Errors that can occur when publishing lifecycle events.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The consumer side of the channel has shut down.
    #[error("Event channel closed")]
    Closed,
}

/// Convenience type alias for channel results.
pub type Result<T> = std::result::Result<T, ChannelError>;
