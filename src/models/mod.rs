//! Core data types shared by producers and workers.

mod task;

pub use task::{Task, TaskArgs};
