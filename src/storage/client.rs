use std::env;
use std::fmt;
use std::time::Duration;

use bb8_redis::{bb8, RedisConnectionManager};

use super::StorageError;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Connection pool sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of simultaneously open connections.
    pub max_size: u32,
    /// Number of idle connections the pool keeps warm.
    pub min_idle: u32,
    /// How long `get` waits for a free connection before giving up.
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 1,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// A connection checked out of a [`RedisPool`]. Dropping it returns the
/// connection to the pool, so every exit path releases what it acquired.
pub type Conn<'a> = bb8::PooledConnection<'a, RedisConnectionManager>;

/// Pooled async connections to a Redis server.
///
/// One pool is shared by every queue, worker, and sweeper in the process;
/// cloning is cheap and clones share the underlying connections.
#[derive(Clone)]
pub struct RedisPool {
    pool: bb8::Pool<RedisConnectionManager>,
}

impl RedisPool {
    /// Connects to the given Redis URL with default pool sizing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] when the URL is invalid or the
    /// server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        Self::with_config(url, PoolConfig::default()).await
    }

    /// Connects with explicit pool sizing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] when the URL is invalid or the
    /// server is unreachable.
    pub async fn with_config(url: &str, config: PoolConfig) -> Result<Self, StorageError> {
        let manager = RedisConnectionManager::new(url)
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let pool = bb8::Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Connects to the URL in `REDIS_URL`, defaulting to
    /// `redis://127.0.0.1:6379`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] when the server is unreachable.
    pub async fn from_env() -> Result<Self, StorageError> {
        let url = env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        Self::connect(&url).await
    }

    /// Checks a connection out of the pool, waiting for a free one if the
    /// pool is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Pool`] when no connection frees up within
    /// the configured timeout.
    pub async fn get(&self) -> Result<Conn<'_>, StorageError> {
        self.pool.get().await.map_err(|e| match e {
            bb8::RunError::User(err) => StorageError::Command(err),
            bb8::RunError::TimedOut => {
                StorageError::Pool("timed out waiting for a connection".to_string())
            }
        })
    }
}

impl fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPool").finish_non_exhaustive()
    }
}
