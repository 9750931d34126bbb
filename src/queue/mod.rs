//! Durable job queues.
//!
//! Three logical queues back the pipeline: a priority-banded repo queue, a
//! FIFO file queue, and an append-only dead-letter sink. All are Redis
//! lists with a reliable-dequeue processing list per queue for crash
//! recovery.

pub mod job;
pub mod redis_queue;

pub use job::{retry_backoff, DeadLetterEntry, FileJob, Priority, QueueJob, RepoJob};
pub use redis_queue::{DeadLetterSink, FileQueue, NackOutcome, QueueError, RepoQueue};
