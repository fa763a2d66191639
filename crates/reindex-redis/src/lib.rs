//! Redis-backed job queue
//!
//! Each topic owns a `pending` and an `active` list. Jobs are `LPUSH`ed onto `pending` and claimed
//! with `RPOPLPUSH` into `active`, so a job is never out of Redis while a
//! worker holds it; completion `LREM`s it from `active`. Failed jobs are kept
//! (bounded) on a third list for inspection.
//!
//! Claim times live in a `claimed` sorted set (score: epoch millis). Jobs whose
//! claim is older than the lease are moved from `active` back to `pending`, so a
//! worker process that dies mid-job does not hold the run open forever.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use reindex_core::{Claim, Job, JobOutcome, JobQueue, QueueError};
use serde::Serialize;

/// Failed jobs kept per topic
const FAILED_KEEP: isize = 1000;

const DEFAULT_PREFIX: &str = "reindex";

/// Connection settings (`REDIS_HOST`, `REDIS_PORT`, `REDIS_AUTH`, `REDIS_DB`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub auth: Option<String>,
    pub db: i64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            auth: None,
            db: 0,
        }
    }
}

impl RedisSettings {
    fn connection_info(&self) -> redis::ConnectionInfo {
        redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: redis::RedisConnectionInfo {
                db: self.db,
                password: self.auth.clone().filter(|a| !a.is_empty()),
                ..Default::default()
            },
        }
    }
}

/// List keys of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicKeys {
    pub pending: String,
    pub active: String,
    pub failed: String,
    pub claimed: String,
}

impl TopicKeys {
    pub fn new(prefix: &str, topic: &str) -> Self {
        Self {
            pending: format!("{prefix}:{topic}:pending"),
            active: format!("{prefix}:{topic}:active"),
            failed: format!("{prefix}:{topic}:failed"),
            claimed: format!("{prefix}:{topic}:claimed"),
        }
    }
}

#[derive(Serialize)]
struct FailedEntry<'a> {
    job: &'a Job,
    reason: &'a str,
}

fn backend(e: redis::RedisError) -> QueueError {
    QueueError::Backend(e.to_string())
}

pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisJobQueue {
    pub async fn connect(settings: &RedisSettings) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = redis::Client::open(settings.connection_info())
            .context("Invalid Redis connection settings")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("Failed to connect to Redis at {}:{}", settings.host, settings.port))?;
        log::debug!("connected to Redis {}:{} db {}", settings.host, settings.port, settings.db);
        Ok(Self {
            conn,
            prefix: DEFAULT_PREFIX.to_string(),
        })
    }

    /// Namespace for every key this queue touches.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn keys(&self, topic: &str) -> TopicKeys {
        TopicKeys::new(&self.prefix, topic)
    }

    /// Drop every pending, active and failed job of `topic`.
    pub async fn purge(&self, topic: &str) -> Result<(), QueueError> {
        let keys = self.keys(topic);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&[keys.pending, keys.active, keys.failed, keys.claimed])
            .await
            .map_err(backend)
    }

    async fn record_failure(&self, topic: &str, job: &Job, reason: &str) -> Result<(), QueueError> {
        let keys = self.keys(topic);
        let entry = serde_json::to_string(&FailedEntry { job, reason })?;
        let mut conn = self.conn.clone();
        let () = redis::pipe()
            .lpush(&keys.failed, entry)
            .ignore()
            .ltrim(&keys.failed, 0, FAILED_KEEP - 1)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, topic: &str, job: &Job) -> Result<(), QueueError> {
        let raw = job.encode()?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(self.keys(topic).pending, raw)
            .await
            .map_err(backend)
    }

    async fn claim(&self, topic: &str) -> Result<Option<Claim>, QueueError> {
        let keys = self.keys(topic);
        let mut conn = self.conn.clone();
        let Some(raw) = conn
            .rpoplpush::<_, _, Option<String>>(&keys.pending, &keys.active)
            .await
            .map_err(backend)?
        else {
            return Ok(None);
        };
        match Job::decode(&raw) {
            Ok(job) => {
                conn.zadd::<_, _, _, ()>(&keys.claimed, &raw, Utc::now().timestamp_millis())
                    .await
                    .map_err(backend)?;
                Ok(Some(Claim { job, receipt: raw }))
            }
            Err(e) => {
                // Unreadable payloads would otherwise sit in `active` forever
                log::error!("{topic}: dropping undecodable job: {e}");
                conn.lrem::<_, _, i64>(&keys.active, 1, &raw)
                    .await
                    .map_err(backend)?;
                conn.lpush::<_, _, ()>(&keys.failed, &raw)
                    .await
                    .map_err(backend)?;
                Err(e)
            }
        }
    }

    async fn complete(
        &self,
        topic: &str,
        claim: &Claim,
        outcome: JobOutcome,
    ) -> Result<(), QueueError> {
        let keys = self.keys(topic);
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .lrem(&keys.active, 1, &claim.receipt)
            .await
            .map_err(backend)?;
        conn.zrem::<_, _, ()>(&keys.claimed, &claim.receipt)
            .await
            .map_err(backend)?;
        if removed == 0 {
            return Err(QueueError::Backend(format!(
                "job {} is not active on {topic}",
                claim.job.id
            )));
        }
        if let JobOutcome::Failed(reason) = outcome {
            self.record_failure(topic, &claim.job, &reason).await?;
        }
        Ok(())
    }

    async fn outstanding(&self, topic: &str) -> Result<u64, QueueError> {
        let keys = self.keys(topic);
        let mut conn = self.conn.clone();
        let (pending, active): (u64, u64) = redis::pipe()
            .llen(&keys.pending)
            .llen(&keys.active)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(pending + active)
    }

    async fn requeue_expired(&self, topic: &str, lease: Duration) -> Result<u64, QueueError> {
        let keys = self.keys(topic);
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();

        // Active jobs without a claim time (claimer died before recording it) start their lease now
        let active: Vec<String> = conn
            .lrange(&keys.active, 0, -1)
            .await
            .map_err(backend)?;
        if !active.is_empty() {
            let mut pipe = redis::pipe();
            for raw in &active {
                pipe.cmd("ZADD")
                    .arg(&keys.claimed)
                    .arg("NX")
                    .arg(now)
                    .arg(raw)
                    .ignore();
            }
            let () = pipe.query_async(&mut conn).await.map_err(backend)?;
        }

        let cutoff = now - lease.as_millis() as i64;
        let expired: Vec<String> = conn
            .zrangebyscore(&keys.claimed, "-inf", cutoff)
            .await
            .map_err(backend)?;
        let mut requeued = 0;
        for raw in expired {
            let removed: i64 = conn
                .lrem(&keys.active, 1, &raw)
                .await
                .map_err(backend)?;
            if removed > 0 {
                // RPOPLPUSH takes from the right, so this job is claimed next
                conn.rpush::<_, _, ()>(&keys.pending, &raw)
                    .await
                    .map_err(backend)?;
                requeued += 1;
            }
            conn.zrem::<_, _, ()>(&keys.claimed, &raw)
                .await
                .map_err(backend)?;
        }
        if requeued > 0 {
            log::warn!("{topic}: requeued {requeued} jobs claimed more than {}s ago", lease.as_secs());
        }
        Ok(requeued)
    }
}
