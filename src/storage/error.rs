use thiserror::Error;

/// Errors raised by the pooled Redis client.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The connection to Redis could not be established.
    #[error("failed to connect to redis: {0}")]
    Connection(String),

    /// The pool could not hand out a connection in time.
    #[error("connection pool gave up: {0}")]
    Pool(String),

    /// A Redis command failed in transit or was rejected by the server.
    #[error("redis command failed: {0}")]
    Command(#[from] redis::RedisError),
}
