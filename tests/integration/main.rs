//! Integration tests for the deferq queue protocol.
//!
//! These tests require a running Redis. Start one with
//! `docker run --rm -p 6379:6379 redis`, then:
//!
//! ```bash
//! cargo test --test integration -- --ignored
//! ```
//!
//! The server is taken from `REDIS_URL` (default
//! `redis://127.0.0.1:6379`). Each test works on uniquely named queues, so
//! the suite is safe to run against a shared instance.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;
mod concurrency;
mod recovery;
mod sweeper_drive;
mod worker_loop;
