use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const QUEUE_KEY: &str = "shelf_scan:detections";

/// Task payload serialized into Redis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionTask {
    pub job_id: Uuid,
    pub owner_id: String,
    pub household_id: Option<String>,
    pub image_key: String,
    pub content_type: String,
}

/// Hands a created job to the worker pool.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, task: &DetectionTask) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed detection queue.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue a detection task.
    pub async fn enqueue(&self, task: &DetectionTask) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(task)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Pop the oldest task.
    ///
    /// Nothing is kept in Redis once a task is taken; a job whose worker dies
    /// mid-run is failed by the timeout sweep.
    pub async fn dequeue(&self) -> Result<Option<DetectionTask>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn.rpop(QUEUE_KEY, None).await?;

        match result {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Get the current queue depth (waiting tasks).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }
}

#[async_trait]
impl JobDispatcher for JobQueue {
    async fn dispatch(&self, task: &DetectionTask) -> Result<(), QueueError> {
        self.enqueue(task).await
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
