//! Common test utilities.

use deferq::{Queue, QueueConfig, RedisPool};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An argument type exercised across the suite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestArg {
    pub a: i64,
    pub b: String,
}

pub fn test_arg() -> TestArg {
    TestArg {
        a: 1,
        b: "test".to_string(),
    }
}

/// Connects using `REDIS_URL` (default `redis://127.0.0.1:6379`).
pub async fn test_pool() -> RedisPool {
    RedisPool::from_env()
        .await
        .expect("failed to connect to Redis - is it running? set REDIS_URL or start redis on 127.0.0.1:6379")
}

/// Generates a unique queue name for test isolation.
pub fn unique_queue_name() -> String {
    format!("deferq-test-{}", Uuid::new_v4().simple())
}

/// Creates a uniquely named queue with default configuration.
pub async fn test_queue() -> Queue {
    Queue::new(unique_queue_name(), test_pool().await)
}

/// Creates a uniquely named queue with explicit configuration.
pub async fn test_queue_with(config: QueueConfig) -> Queue {
    Queue::with_config(unique_queue_name(), test_pool().await, config)
}
