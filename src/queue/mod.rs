//! The queue protocol over Redis lists and hashes.
//!
//! For a queue named `N`, the store holds:
//!
//! | Key             | Type       | Contents                                   |
//! |-----------------|------------|--------------------------------------------|
//! | `N`             | list       | serialized task bytes, head next to run    |
//! | `N_noti`        | list       | one `"1"` sentinel per available task      |
//! | `N_processing`  | hash       | worker id -> in-flight task bytes          |
//! | `<worker id>`   | string+TTL | presence proves the worker is alive        |
//!
//! Consumers block on the notification list, then claim the task bytes and
//! record them as in-flight in a single server-side script. A second script
//! reconciles sentinel counts and re-pushes tasks whose worker's liveness
//! key has expired. Between operations a task is on the list, in exactly
//! one processing slot, or released.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use redis::Script;
use uuid::Uuid;

use crate::models::Task;
use crate::storage::RedisPool;

mod error;

pub use error::QueueError;

const NOTI_KEY_SUFFIX: &str = "_noti";
const PROCESSING_KEY_SUFFIX: &str = "_processing";

const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Redis treats a BLPOP timeout of one millisecond or less as zero, which
/// means "block forever".
const MIN_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(1);

// KEYS: queue, processing  ARGV: worker id
//
// LPOP yields false when the sentinel count ran ahead of the task list
// (a concurrent requeue-lost pushed compensating sentinels); the nil reply
// tells the consumer there is no task this cycle.
const DEQUEUE_SCRIPT: &str = r"local task = redis.call('lpop', KEYS[1])
if not task then
    return nil
end
redis.call('hset', KEYS[2], ARGV[1], task)
return task";

// KEYS: queue, noti, processing
//
// Recovered tasks go to the tail of the task list; sentinels are
// indistinguishable so they can be pushed at the head in one call.
const REQUEUE_LOST_SCRIPT: &str = r"local queue_len = redis.call('llen', KEYS[1])
local noti_len = redis.call('llen', KEYS[2])
local count = queue_len - noti_len
local processing = redis.call('hgetall', KEYS[3])
for i = 1, #processing, 2 do
    local worker_id = processing[i]
    if not redis.call('get', worker_id) then
        count = count + 1
        redis.call('rpush', KEYS[1], processing[i + 1])
        redis.call('hdel', KEYS[3], worker_id)
    end
end
if count > 0 then
    local sentinels = {}
    for i = 1, count do
        sentinels[i] = '1'
    end
    redis.call('lpush', KEYS[2], unpack(sentinels))
end
return count";

/// Tunables for a queue binding.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a dequeue blocks waiting for a notification. Values of one
    /// millisecond or less fall back to the default of one second.
    pub dequeue_timeout: Duration,
    /// TTL of the worker liveness key. Must be several times the worker's
    /// heartbeat interval so one missed tick does not mark it dead. Zero
    /// falls back to the default of sixty seconds.
    pub keep_alive_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
        }
    }
}

/// A named task queue.
///
/// Cloning a queue shares the connection pool but keeps the clone's own
/// worker identity; give each consumer its own clone.
#[derive(Clone)]
pub struct Queue {
    name: String,
    noti_key: String,
    processing_key: String,
    worker_id: String,
    dequeue_timeout: Duration,
    keep_alive_timeout: Duration,
    pool: RedisPool,
    dequeue_script: Arc<Script>,
    requeue_lost_script: Arc<Script>,
}

impl Queue {
    /// Creates a queue binding with default configuration.
    pub fn new(name: impl Into<String>, pool: RedisPool) -> Self {
        Self::with_config(name, pool, QueueConfig::default())
    }

    /// Creates a queue binding with explicit configuration.
    pub fn with_config(name: impl Into<String>, pool: RedisPool, config: QueueConfig) -> Self {
        let name = name.into();
        let dequeue_timeout = if config.dequeue_timeout > MIN_DEQUEUE_TIMEOUT {
            config.dequeue_timeout
        } else {
            DEFAULT_DEQUEUE_TIMEOUT
        };
        let keep_alive_timeout = if config.keep_alive_timeout.is_zero() {
            DEFAULT_KEEP_ALIVE_TIMEOUT
        } else {
            config.keep_alive_timeout
        };
        Self {
            noti_key: format!("{name}{NOTI_KEY_SUFFIX}"),
            processing_key: format!("{name}{PROCESSING_KEY_SUFFIX}"),
            worker_id: random_worker_id(),
            name,
            dequeue_timeout,
            keep_alive_timeout,
            pool,
            dequeue_script: Arc::new(Script::new(DEQUEUE_SCRIPT)),
            requeue_lost_script: Arc::new(Script::new(REQUEUE_LOST_SCRIPT)),
        }
    }

    /// The queue name, which is also the Redis key of the task list.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The Redis key of the notification list.
    #[must_use]
    pub fn noti_key(&self) -> &str {
        &self.noti_key
    }

    /// The Redis key of the in-flight task hash.
    #[must_use]
    pub fn processing_key(&self) -> &str {
        &self.processing_key
    }

    /// The worker identity this binding dequeues under.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The shared connection pool.
    #[must_use]
    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    pub(crate) fn bind_worker(&mut self, worker_id: String) {
        self.worker_id = worker_id;
    }

    /// Appends a task to the queue.
    ///
    /// The task bytes land on the task list before the notification
    /// sentinel, so a consumer that sees a sentinel finds a task unless a
    /// concurrent recovery already repaired the counts. If the round trip
    /// fails partway the lists disagree by one; the next requeue-lost pass
    /// reconciles them.
    ///
    /// # Errors
    ///
    /// Surfaces [`CodecError`](crate::CodecError) when the task cannot be
    /// serialized, and transport errors from the store.
    pub async fn enqueue(&self, task: &Task) -> Result<(), QueueError> {
        let data = task.serialize().map_err(|err| {
            tracing::error!(func_path = %task.func_path(), error = %err, "failed to serialize task");
            err
        })?;

        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        pipe.rpush(&self.name, data)
            .ignore()
            .rpush(&self.noti_key, 1)
            .ignore();
        let _: () = pipe.query_async(&mut *conn).await?;

        counter!("deferq.tasks.enqueued", "queue" => self.name.clone()).increment(1);
        tracing::debug!(queue = %self.name, func_path = %task.func_path(), "enqueued task");
        Ok(())
    }

    /// Pops a task from the front of the queue, blocking for up to the
    /// configured dequeue timeout.
    ///
    /// Returns `Ok(None)` when the timeout expires with nothing available,
    /// and also when a notification was consumed but the task list was
    /// empty because a concurrent recovery pushed compensating sentinels.
    ///
    /// A task whose payload does not decode is logged, released, and
    /// reported as `Ok(None)` so a malformed record cannot wedge the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidReply`] when the store answers with a
    /// sentinel the protocol forbids, and transport errors otherwise.
    pub async fn dequeue(&self) -> Result<Option<Task>, QueueError> {
        let mut conn = self.pool.get().await?;

        let reply: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(&self.noti_key)
            .arg(self.dequeue_timeout.as_secs_f64())
            .query_async(&mut *conn)
            .await?;
        let Some((_, sentinel)) = reply else {
            return Ok(None);
        };
        if sentinel != b"1" {
            return Err(QueueError::InvalidReply);
        }

        let data: Option<Vec<u8>> = self
            .dequeue_script
            .key(&self.name)
            .key(&self.processing_key)
            .arg(&self.worker_id)
            .invoke_async(&mut *conn)
            .await?;
        let Some(data) = data else {
            return Ok(None);
        };

        counter!("deferq.tasks.dequeued", "queue" => self.name.clone()).increment(1);
        match Task::deserialize(data) {
            Ok(task) => {
                tracing::debug!(queue = %self.name, func_path = %task.func_path(), "dequeued task");
                Ok(Some(task))
            }
            Err(err) => {
                tracing::error!(queue = %self.name, error = %err, "dropping undecodable task");
                let _: i64 = redis::cmd("HDEL")
                    .arg(&self.processing_key)
                    .arg(&self.worker_id)
                    .query_async(&mut *conn)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Releases the task this binding currently holds in flight.
    ///
    /// Must be called after every handled task, including ones whose
    /// handler failed, so the task is not recovered and re-run forever.
    ///
    /// # Errors
    ///
    /// Surfaces transport errors from the store.
    pub async fn release(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("HDEL")
            .arg(&self.processing_key)
            .arg(&self.worker_id)
            .query_async(&mut *conn)
            .await?;
        counter!("deferq.tasks.released", "queue" => self.name.clone()).increment(1);
        tracing::debug!(queue = %self.name, worker_id = %self.worker_id, "released task");
        Ok(())
    }

    /// Finds tasks held by dead workers, re-pushes them, and reconciles the
    /// notification count with the task list. Returns how many sentinels
    /// were added.
    ///
    /// Recovered tasks re-enter at the tail, behind anything enqueued since
    /// they were lost; delivery stays at-least-once with no ordering
    /// guarantee across recoveries.
    ///
    /// # Errors
    ///
    /// Surfaces transport errors from the store.
    pub async fn requeue_lost(&self) -> Result<i64, QueueError> {
        let mut conn = self.pool.get().await?;
        let count: i64 = self
            .requeue_lost_script
            .key(&self.name)
            .key(&self.noti_key)
            .key(&self.processing_key)
            .invoke_async(&mut *conn)
            .await?;
        if count > 0 {
            counter!("deferq.tasks.requeued_lost", "queue" => self.name.clone())
                .increment(count.unsigned_abs());
            tracing::debug!(queue = %self.name, count, "requeued lost tasks");
        }
        Ok(count)
    }

    /// The number of tasks waiting on the queue.
    ///
    /// # Errors
    ///
    /// Surfaces transport errors from the store.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.pool.get().await?;
        let count: usize = redis::cmd("LLEN")
            .arg(&self.name)
            .query_async(&mut *conn)
            .await?;
        Ok(count)
    }

    /// Whether the queue has no waiting tasks.
    ///
    /// # Errors
    ///
    /// Surfaces transport errors from the store.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Removes all queue state from Redis, including this binding's
    /// liveness key. Intended for tests and operational cleanup.
    ///
    /// # Errors
    ///
    /// Surfaces transport errors from the store.
    pub async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(&self.name)
            .arg(&self.noti_key)
            .arg(&self.processing_key)
            .arg(&self.worker_id)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    /// Refreshes this binding's liveness key for the configured TTL.
    ///
    /// # Errors
    ///
    /// Surfaces transport errors from the store.
    pub async fn keep_alive(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::cmd("SETEX")
            .arg(&self.worker_id)
            .arg(self.keep_alive_timeout.as_secs().max(1))
            .arg(1)
            .query_async(&mut *conn)
            .await?;
        tracing::debug!(worker_id = %self.worker_id, "worker is alive");
        Ok(())
    }

    /// Deletes this binding's liveness key so the next requeue-lost pass
    /// recovers anything it still holds in flight.
    ///
    /// # Errors
    ///
    /// Surfaces transport errors from the store.
    pub async fn die(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(&self.worker_id)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

pub(crate) fn random_worker_id() -> String {
    Uuid::new_v4().simple().to_string()
}
