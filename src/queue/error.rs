use thiserror::Error;

use crate::codec::CodecError;
use crate::storage::StorageError;

/// Errors surfaced by queue operations.
///
/// Transport problems are surfaced so callers can retry or back off;
/// payload problems are contained close to where they happen (see
/// [`Queue::dequeue`](crate::Queue::dequeue)).
#[derive(Debug, Error)]
pub enum QueueError {
    /// The store is unreachable or a command failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The store answered with a reply shape the protocol forbids.
    #[error("invalid redis reply")]
    InvalidReply,

    /// A task record could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Storage(StorageError::Command(err))
    }
}
