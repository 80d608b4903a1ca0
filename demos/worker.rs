//! Runs a worker consuming the demo queue.
//!
//! Run with:
//!     cargo run --example worker
//!
//! Stop it with SIGHUP (`kill -HUP <pid>`) or Ctrl+C. Shutdown waits for
//! the task in flight, then removes the liveness key.

use deferq::{Queue, RedisPool, Worker};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
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
    let mut worker = Worker::new(queue);

    worker.register_as("demo.greet", |greeting: Greeting| async move {
        for _ in 0..greeting.count {
            println!("hello, {}!", greeting.name);
        }
    });

    worker.register_as("demo.add", |a: i64, b: i64| async move {
        println!("{a} + {b} = {}", a + b);
    });

    worker.register_as("demo.tick", || async {
        println!("tick");
    });

    // SIGHUP is wired up by the worker itself; Ctrl+C is a convenience for
    // interactive runs.
    let handle = worker.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    worker.run().await?;
    Ok(())
}
