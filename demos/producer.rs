//! Enqueues a few demo tasks.
//!
//! Run with:
//!     cargo run --example producer
//!
//! Expects a Redis at `REDIS_URL` (default `redis://127.0.0.1:6379`).
//! Pair with the worker demo, which registers handlers for these paths.

use deferq::{Queue, RedisPool, Task};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Greeting {
    name: String,
    count: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let pool = RedisPool::from_env().await?;
    let queue = Queue::new("deferq-demo", pool);

    queue
        .enqueue(&Task::new(
            "demo.greet",
            (Greeting {
                name: "world".to_string(),
                count: 3,
            },),
        )?)
        .await?;

    queue.enqueue(&Task::new("demo.add", (2i64, 3i64))?).await?;
    queue.enqueue(&Task::new("demo.tick", ())?).await?;

    println!("enqueued 3 tasks, queue length is now {}", queue.len().await?);
    Ok(())
}
