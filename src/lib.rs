//! deferq - a Redis-backed distributed task queue.
//!
//! Producers enqueue tasks (a function path plus MessagePack-encoded
//! arguments); workers block on a notification list, claim tasks
//! atomically through a server-side script, dispatch them to registered
//! async handlers, and heartbeat a liveness key while they work. A
//! [`Sweeper`] periodically re-enqueues tasks whose worker died holding
//! them.
//!
//! Delivery is at-least-once: a task may run more than once across
//! recoveries, so handlers should be idempotent. There is no retry of
//! handler errors and no ordering guarantee for recovered tasks.
//!
//! # Example
//!
//! ```no_run
//! use deferq::{Queue, RedisPool, Task, Worker};
//!
//! async fn greet(name: String) {
//!     println!("hello {name}");
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = RedisPool::from_env().await?;
//!     let queue = Queue::new("demo", pool);
//!
//!     queue.enqueue(&Task::new("greet", ("deferq".to_string(),))?).await?;
//!
//!     let mut worker = Worker::new(queue);
//!     worker.register_as("greet", greet);
//!     worker.run().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod handler;
pub mod models;
pub mod queue;
pub mod storage;
pub mod sweeper;
pub mod worker;

pub use codec::CodecError;
pub use handler::{Handler, HandlerError, HandlerRegistry};
pub use models::{Task, TaskArgs};
pub use queue::{Queue, QueueConfig, QueueError};
pub use storage::{PoolConfig, RedisPool, StorageError};
pub use sweeper::Sweeper;
pub use worker::{RunStatus, Worker, WorkerConfig, WorkerError, WorkerHandle};
